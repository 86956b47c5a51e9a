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

mod oneshot_trigger;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use crate::oneshot_trigger::OneshotSignal;

/// Trigger for a [ShutdownSignal]. Long-running operations hold a `ShutdownSignal` and check
/// it between batches; the owner triggers it once to cancel all of them.
#[derive(Debug)]
pub struct Shutdown {
    trigger: oneshot_trigger::OneshotTrigger<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            trigger: oneshot_trigger::OneshotTrigger::new(),
        }
    }

    pub fn trigger(&mut self) {
        self.trigger.broadcast(());
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_used()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            inner: self.trigger.to_signal(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// A cloneable future that resolves once the matching [Shutdown] is triggered or dropped.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: OneshotSignal<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.inner.is_terminated()
    }

    /// A signal that can never be triggered.
    pub fn never() -> Self {
        Self {
            inner: OneshotSignal::never(),
        }
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            // Whether the trigger fired or was dropped, the result is the same: shut down
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn signal_resolves_after_trigger() {
        let mut shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        assert!(!signal.is_triggered());
        shutdown.trigger();
        assert!(signal.is_triggered());
        signal.await;
    }

    #[tokio::test]
    async fn signal_resolves_on_drop() {
        let shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        drop(shutdown);
        signal.await;
    }

    #[test]
    fn never_signal_is_never_triggered() {
        assert!(!ShutdownSignal::never().is_triggered());
    }
}
