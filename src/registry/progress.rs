use std::sync::mpsc::Sender;

/// Receives cosmetic progress while a multi-target training runs
pub trait ProgressCallback {
    fn on_target_start(&mut self, target: &str, index: usize, total: usize);
    fn on_target_complete(&mut self, target: &str, accuracy: f64);
}

/// Discards all updates
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_target_start(&mut self, _target: &str, _index: usize, _total: usize) {}
    fn on_target_complete(&mut self, _target: &str, _accuracy: f64) {}
}

pub struct LogProgressCallback;

impl ProgressCallback for LogProgressCallback {
    fn on_target_start(&mut self, target: &str, index: usize, total: usize) {
        log::info!("Training target {}/{}: {}", index + 1, total, target);
    }

    fn on_target_complete(&mut self, target: &str, accuracy: f64) {
        log::info!("Target {} complete. Accuracy: {:.4}", target, accuracy);
    }
}

// For pushing updates to another thread
pub struct ChannelProgressCallback {
    sender: Sender<ProgressMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMessage {
    TargetStart { target: String, index: usize, total: usize },
    TargetComplete { target: String, accuracy: f64 },
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn on_target_start(&mut self, target: &str, index: usize, total: usize) {
        let _ = self.sender.send(ProgressMessage::TargetStart {
            target: target.to_string(),
            index,
            total,
        });
    }

    fn on_target_complete(&mut self, target: &str, accuracy: f64) {
        let _ = self.sender.send(ProgressMessage::TargetComplete {
            target: target.to_string(),
            accuracy,
        });
    }
}
