//! Blocking and future-based calling conventions.
//!
//! Both conventions run the same [`Invoker::invoke`] state machine; they only
//! differ in how the caller waits for the outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{InvocationError, InvocationResult};
use crate::invoker::Invoker;
use crate::proxy::Proxy;
use crate::transport::{OperationMode, Request};

/// Pending outcome of a call started with [`Invoker::call_async`].
///
/// The call runs on the runtime it was spawned on whether or not this future
/// is polled. Dropping the future cancels the call: no further attempt is
/// sent, though an attempt already in flight is not recalled.
#[derive(Debug)]
#[must_use = "dropping an InvocationFuture cancels the call"]
pub struct InvocationFuture {
    task: JoinHandle<InvocationResult<Bytes>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl InvocationFuture {
    /// Stop the call at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the call has reached a terminal outcome
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for InvocationFuture {
    type Output = InvocationResult<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            // The runtime shut down under the call.
            Poll::Ready(Err(_)) => Poll::Ready(Err(InvocationError::Cancelled { attempts: 0 })),
        }
    }
}

impl Invoker {
    /// Start `operation` on `runtime` and return a future for its outcome
    pub fn call_async(
        &self,
        proxy: &Proxy,
        operation: &str,
        args: Bytes,
        mode: OperationMode,
        runtime: &Handle,
    ) -> InvocationFuture {
        self.invoke_async(proxy.clone(), Request::new(operation, mode, args), runtime)
    }

    /// Start `request` on `runtime` and return a future for its outcome
    pub fn invoke_async(&self, proxy: Proxy, request: Request, runtime: &Handle) -> InvocationFuture {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let invoker = self.clone();
        let task = runtime.spawn(async move { invoker.invoke(&proxy, request, &token).await });

        InvocationFuture {
            task,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

/// Synchronous front end to an [`Invoker`].
///
/// Blocks the calling thread while the call runs on a multi-threaded runtime.
/// Must not be used from inside an async context, and a current-thread
/// runtime cannot drive its timers from here.
#[derive(Debug, Clone)]
pub struct BlockingInvoker {
    invoker: Invoker,
    runtime: Handle,
}

impl BlockingInvoker {
    /// Wrap `invoker`, running calls on `runtime`
    pub fn new(invoker: Invoker, runtime: Handle) -> Self {
        Self { invoker, runtime }
    }

    /// The wrapped invoker
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Invoke `operation` and block until its terminal outcome
    pub fn call(
        &self,
        proxy: &Proxy,
        operation: &str,
        args: Bytes,
        mode: OperationMode,
    ) -> InvocationResult<Bytes> {
        self.invoke(proxy, Request::new(operation, mode, args), &CancellationToken::new())
    }

    /// Drive `request` and block until its terminal outcome
    pub fn invoke(
        &self,
        proxy: &Proxy,
        request: Request,
        cancel: &CancellationToken,
    ) -> InvocationResult<Bytes> {
        self.runtime
            .block_on(self.invoker.invoke(proxy, request, cancel))
    }
}
