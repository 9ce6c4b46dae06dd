//! Pending device operations and the pump that resolves them.
//!
//! Backend map callbacks only forward their status through a oneshot channel.
//! The work attached to a map (copying out of the mapping, unmapping, running
//! user callbacks) is queued here as a continuation and runs inside
//! [`DeviceHandle::process_events`](crate::DeviceHandle::process_events) on the
//! thread that pumps the device.

use std::{
    future::Future,
    mem,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
    time::Duration,
};

use futures::channel::oneshot;

use crate::error::{GpuError, GpuResult};

pub(crate) type MapStatus = Result<(), wgpu::BufferAsyncError>;
pub(crate) type Continuation = Box<dyn FnOnce(MapStatus) + Send>;

/// Bounded wait passed to [`DeviceHandle::wait_any`](crate::DeviceHandle::wait_any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    After(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// A map request whose status has not been observed yet.
pub(crate) struct MapRequest(oneshot::Receiver<MapStatus>);

impl MapRequest {
    /// A request that is already satisfied. Its continuation still waits for
    /// the next pump, like any other.
    pub(crate) fn resolved() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        MapRequest(rx)
    }
}

struct Pending {
    status: oneshot::Receiver<MapStatus>,
    then: Continuation,
}

#[derive(Default)]
pub(crate) struct EventLoop {
    pending: Mutex<Vec<Pending>>,
}

impl EventLoop {
    /// Requests a map of `range` on `buffer`. The request must be handed to
    /// [`EventLoop::schedule`] to attach work to its completion.
    pub(crate) fn request_map(
        buffer: &wgpu::Buffer,
        range: std::ops::Range<u64>,
        mode: wgpu::MapMode,
    ) -> MapRequest {
        let (tx, rx) = oneshot::channel();
        buffer.slice(range).map_async(mode, move |status| {
            // receiver gone means the pool or loop was torn down
            let _ = tx.send(status);
        });
        MapRequest(rx)
    }

    pub(crate) fn schedule(&self, request: MapRequest, then: Continuation) {
        self.lock().push(Pending {
            status: request.0,
            then,
        });
    }

    /// Runs every continuation whose map status has arrived. Returns how many ran.
    pub(crate) fn drain_ready(&self) -> usize {
        let ready = {
            let mut pending = self.lock();
            let mut ready = Vec::new();
            let mut waiting = Vec::with_capacity(pending.len());
            for mut p in mem::take(&mut *pending) {
                match p.status.try_recv() {
                    Ok(Some(status)) => ready.push((status, p.then)),
                    Ok(None) => waiting.push(p),
                    Err(oneshot::Canceled) => ready.push((Err(wgpu::BufferAsyncError), p.then)),
                }
            }
            *pending = waiting;
            ready
        };

        // continuations may schedule more work, so the lock is released first
        let count = ready.len();
        for (status, then) in ready {
            then(status);
        }
        count
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Pending>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Handle to an operation the device completes later.
///
/// Resolves only while the device is pumped. Also implements
/// [`std::future::Future`] for callers driving their own executor.
pub struct GpuFuture<T> {
    rx: Option<oneshot::Receiver<GpuResult<T>>>,
}

/// Sending half of a [`GpuFuture`], moved into continuations.
pub(crate) struct Completion<T>(oneshot::Sender<GpuResult<T>>);

impl<T> Completion<T> {
    pub(crate) fn resolve(self, result: GpuResult<T>) {
        let _ = self.0.send(result);
    }
}

impl<T> GpuFuture<T> {
    pub(crate) fn pair() -> (Completion<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (Completion(tx), Self { rx: Some(rx) })
    }

    /// Future that is already resolved.
    pub fn ready(value: T) -> Self {
        let (done, fut) = Self::pair();
        done.resolve(Ok(value));
        fut
    }

    /// Takes the result if the operation has resolved, without pumping the device.
    pub fn try_take(&mut self) -> GpuResult<Option<T>> {
        let rx = self.rx.as_mut().ok_or(GpuError::CompletionDropped)?;
        match rx.try_recv() {
            Ok(Some(result)) => {
                self.rx = None;
                result.map(Some)
            }
            Ok(None) => Ok(None),
            Err(oneshot::Canceled) => {
                self.rx = None;
                Err(GpuError::CompletionDropped)
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.is_none()
    }
}

impl<T> Future for GpuFuture<T> {
    type Output = GpuResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(GpuError::CompletionDropped));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                self.rx = None;
                Poll::Ready(result.unwrap_or(Err(GpuError::CompletionDropped)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn manual_request() -> (oneshot::Sender<MapStatus>, MapRequest) {
        let (tx, rx) = oneshot::channel();
        (tx, MapRequest(rx))
    }

    #[test]
    fn continuation_runs_only_after_status_arrives() {
        let events = EventLoop::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, request) = manual_request();

        let counter = Arc::clone(&hits);
        events.schedule(
            request,
            Box::new(move |status| {
                assert!(status.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(events.drain_ready(), 0);
        assert_eq!(events.pending(), 1);

        tx.send(Ok(())).unwrap();
        assert_eq!(events.drain_ready(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(events.pending(), 0);
    }

    #[test]
    fn resolved_request_waits_for_the_pump() {
        let events = EventLoop::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        events.schedule(
            MapRequest::resolved(),
            Box::new(move |status| {
                assert!(status.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(events.pending(), 1);
        assert_eq!(events.drain_ready(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_status_is_a_map_failure() {
        let events = EventLoop::default();
        let failed = Arc::new(AtomicUsize::new(0));
        let (tx, request) = manual_request();

        let counter = Arc::clone(&failed);
        events.schedule(
            request,
            Box::new(move |status| {
                if status.is_err() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        drop(tx);

        assert_eq!(events.drain_ready(), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn future_resolves_once() {
        let (done, mut fut) = GpuFuture::<u32>::pair();
        assert!(fut.try_take().unwrap().is_none());

        done.resolve(Ok(7));
        assert_eq!(fut.try_take().unwrap(), Some(7));
        assert!(fut.is_resolved());
        assert!(matches!(fut.try_take(), Err(GpuError::CompletionDropped)));
    }

    #[test]
    fn dropped_completion_fails_the_future() {
        let (done, mut fut) = GpuFuture::<()>::pair();
        drop(done);
        assert!(matches!(fut.try_take(), Err(GpuError::CompletionDropped)));
    }

    #[test]
    fn ready_future_can_be_awaited() {
        let fut = GpuFuture::ready(vec![1u8, 2, 3]);
        let value = futures::executor::block_on(fut).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }
}
