// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time;

use crate::Elapsed;

fn runtime() -> &'static tokio::runtime::Runtime {
    static INSTANCE: OnceCell<tokio::runtime::Runtime> = OnceCell::new();
    INSTANCE.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .unwrap_or_else(|e| panic!("failed to start tokio runtime: {}", e))
    })
}

/// Handle to a spawned task. Dropping it detaches the task.
#[derive(Debug)]
pub struct TaskHandle<T>(JoinHandle<T>);

impl<T> TaskHandle<T> {
    /// Aborts the task and waits for it to stop. Yields `None` when the task
    /// was stopped before it produced its output.
    pub async fn cancel(self) -> Option<T> {
        self.0.abort();
        self.await
    }

    /// Waits for the task to complete.
    pub async fn wait(self) -> Option<T> {
        self.await
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.poll_unpin(cx) {
            Poll::Ready(Ok(t)) => Poll::Ready(Some(t)),
            Poll::Ready(Err(e)) => {
                log::trace!("task ended without output: {}", e);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub fn block_on<F, T>(future: F) -> T
where
    F: Future<Output = T>,
{
    use std::cell::Cell;

    thread_local! {
        static NESTED: Cell<usize> = Cell::new(0);
    }

    NESTED.with(|nested| {
        let depth = nested.get();
        nested.set(depth + 1);
        let res = if depth == 0 {
            runtime().block_on(future)
        } else {
            tokio::task::block_in_place(|| futures::executor::block_on(future))
        };
        nested.set(depth);
        res
    })
}

pub fn spawn<F, T>(future: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    TaskHandle(runtime().spawn(future))
}

pub async fn sleep(dur: Duration) {
    time::sleep(dur).await
}

/// Runs `f` to completion unless `dur` elapses first.
pub async fn timeout<F, T>(dur: Duration, f: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    time::timeout(dur, f).await.map_err(|_| Elapsed)
}
