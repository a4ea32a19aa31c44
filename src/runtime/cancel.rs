use std::sync::{Arc, Mutex};

/// Shared flag a caller sets when it walks away from a running job
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Mutex<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if let Ok(mut flag) = self.inner.lock() {
            *flag = true;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().map(|f| *f).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
