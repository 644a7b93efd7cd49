//! Output channel abstraction.

use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// The receiving side hung up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Somewhere to put outgoing messages of type `T`.
pub trait Sink<T>: Send {
    fn send(&self, msg: T) -> Result<(), Disconnected>;
}

impl<T: Send> Sink<T> for Sender<T> {
    fn send(&self, msg: T) -> Result<(), Disconnected> {
        Sender::send(self, msg).map_err(|_| Disconnected)
    }
}

/// Sink that keeps everything it is given. Useful for replay tools and
/// tests that inspect output after the fact.
#[derive(Debug, Default)]
pub struct CollectingSink<T> {
    items: Mutex<Vec<T>>,
}

impl<T> CollectingSink<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Send> Sink<T> for CollectingSink<T> {
    fn send(&self, msg: T) -> Result<(), Disconnected> {
        self.items.lock().push(msg);
        Ok(())
    }
}

impl<T, S: Sink<T> + Sync> Sink<T> for std::sync::Arc<S> {
    fn send(&self, msg: T) -> Result<(), Disconnected> {
        (**self).send(msg)
    }
}
