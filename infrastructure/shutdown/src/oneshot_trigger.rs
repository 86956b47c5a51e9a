// Copyright 2022. The Handsel Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{channel::oneshot, future::Shared, FutureExt};

/// A oneshot channel that broadcasts a cloneable value to any number of listening signals.
pub struct OneshotTrigger<T> {
    sender: Option<oneshot::Sender<T>>,
    signal: OneshotSignal<T>,
}

impl<T: Clone> OneshotTrigger<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Some(tx),
            signal: OneshotSignal {
                inner: Some(rx.shared()),
                terminated: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    pub fn to_signal(&self) -> OneshotSignal<T> {
        self.signal.clone()
    }

    pub fn broadcast(&mut self, item: T) {
        if let Some(tx) = self.sender.take() {
            self.signal.terminated.store(true, Ordering::SeqCst);
            let _ = tx.send(item);
        }
    }

    pub fn is_used(&self) -> bool {
        self.sender.is_none()
    }
}

impl<T: Clone> Default for OneshotTrigger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for OneshotTrigger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneshotTrigger")
            .field("is_used", &self.sender.is_none())
            .finish()
    }
}

/// Receiving side of an [OneshotTrigger]. Resolves to `Some(value)` on broadcast, or `None`
/// if the trigger was dropped without broadcasting.
pub struct OneshotSignal<T> {
    inner: Option<Shared<oneshot::Receiver<T>>>,
    terminated: Arc<AtomicBool>,
}

impl<T: Clone> OneshotSignal<T> {
    /// A signal that never resolves.
    pub fn never() -> Self {
        Self {
            inner: None,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl<T> Clone for OneshotSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            terminated: self.terminated.clone(),
        }
    }
}

impl<T: Clone> Future for OneshotSignal<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = match this.inner.as_mut() {
            Some(inner) => inner,
            None => return Poll::Pending,
        };
        match Pin::new(inner).poll(cx) {
            Poll::Ready(Ok(v)) => {
                this.terminated.store(true, Ordering::SeqCst);
                Poll::Ready(Some(v))
            },
            // Trigger dropped without a broadcast
            Poll::Ready(Err(_)) => {
                this.terminated.store(true, Ordering::SeqCst);
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for OneshotSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneshotSignal")
            .field("is_terminated", &self.terminated.load(Ordering::SeqCst))
            .finish()
    }
}
