use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::backend::KernelBackend;

use super::{Session, SessionConfig};

/// Hands out sessions to concurrent callers, one per caller.
///
/// Sessions keep their plan cache and memory manager between checkouts. The pool never shares a
/// session between threads at the same time.
pub struct SessionPool<B: KernelBackend> {
    backend: Arc<B>,
    config: SessionConfig,
    idle: Mutex<Vec<Session<B>>>,
}

impl<B: KernelBackend> SessionPool<B> {
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        SessionPool {
            backend,
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Takes an idle session, creating one when none is available.
    pub fn acquire(&self) -> PooledSession<'_, B> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let session = reused.unwrap_or_else(|| {
            log::debug!("session pool: creating session");
            Session::with_config(Arc::clone(&self.backend), self.config.clone())
        });
        PooledSession {
            pool: self,
            session: Some(session),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn restore(&self, session: Session<B>) {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(session);
    }
}

/// A checked-out session; goes back to its pool on drop.
pub struct PooledSession<'p, B: KernelBackend> {
    pool: &'p SessionPool<B>,
    session: Option<Session<B>>,
}

impl<B: KernelBackend> Deref for PooledSession<'_, B> {
    type Target = Session<B>;

    fn deref(&self) -> &Session<B> {
        match &self.session {
            Some(session) => session,
            None => unreachable!("session is only taken on drop"),
        }
    }
}

impl<B: KernelBackend> DerefMut for PooledSession<'_, B> {
    fn deref_mut(&mut self) -> &mut Session<B> {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("session is only taken on drop"),
        }
    }
}

impl<B: KernelBackend> Drop for PooledSession<'_, B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.restore(session);
        }
    }
}
