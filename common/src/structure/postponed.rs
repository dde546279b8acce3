use std::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use futures_util::future::join_all;
use tracing::debug;

pub type PostponedFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Deferred work registered during a topology operation, with a string
/// descriptor per entry. The operation's caller drains the container after
/// the main work completes; the container itself never executes anything
/// spontaneously.
pub struct PostponedFunctionsContainer {
    name: String,

    entries: Mutex<Vec<(String, PostponedFuture)>>,
}

impl PostponedFunctionsContainer {
    pub fn new(name: impl Into<String>) -> Self {
        PostponedFunctionsContainer {
            name: name.into(),
            entries: Mutex::new(vec![]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add<F>(&self, description: impl Into<String>, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let description = description.into();
        debug!("postponing: {}", description);
        self.entries.lock().unwrap().push((description, Box::pin(f)));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Drains the container and awaits everything that was postponed.
    pub async fn invoke_all(&self) {
        let drained: Vec<(String, PostponedFuture)> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        debug!("{}: invoking {} postponed functions", self.name, drained.len());
        join_all(drained.into_iter().map(|(_, f)| f)).await;
    }
}

impl Debug for PostponedFunctionsContainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PostponedFunctionsContainer")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
