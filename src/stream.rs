//! stream.rs
//!
//! Hub de eventos hacia el suscriptor de una simulacion (SSE).
//!
//! - Un solo suscriptor por ejecucion, empuje sin bloqueo: los eventos
//!   `status`/`complete`/`error` se entregan siempre y en orden; los
//!   `live_data` van en un buffer de tamaño 1 con sobrescritura (solo
//!   interesa la foto mas reciente).
//! - Tras el evento terminal no se entrega nada mas.
//! - La cancelacion del suscriptor queda visible para el bucle de
//!   simulacion via `is_cancelled`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Notify;

use crate::sim::snapshot::LiveSnapshot;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { message: String },
    LiveData { data: LiveSnapshot, message: String },
    Complete { response: serde_json::Value },
    Error { message: String },
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

#[derive(Default)]
struct HubInner {
    strict: VecDeque<StreamEvent>,
    live: Option<StreamEvent>,
    /// Terminal encolado: se ignoran emisiones posteriores.
    closed: bool,
    /// Terminal ya entregado: recv devuelve None.
    done: bool,
}

pub struct StreamHub {
    inner: Mutex<HubInner>,
    notify: Notify,
    cancelled: AtomicBool,
}

impl StreamHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner::default()),
            notify: Notify::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn emit(&self, ev: StreamEvent) {
        {
            let mut g = self.inner.lock().unwrap();
            if g.closed {
                return;
            }
            if ev.is_terminal() {
                g.closed = true;
                g.strict.push_back(ev);
            } else if matches!(ev, StreamEvent::LiveData { .. }) {
                g.live = Some(ev);
            } else {
                g.strict.push_back(ev);
            }
        }
        self.notify.notify_one();
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(StreamEvent::Status {
            message: message.into(),
        });
    }

    pub fn live(&self, data: LiveSnapshot, message: impl Into<String>) {
        self.emit(StreamEvent::LiveData {
            data,
            message: message.into(),
        });
    }

    pub fn complete(&self, response: serde_json::Value) {
        self.emit(StreamEvent::Complete { response });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StreamEvent::Error {
            message: message.into(),
        });
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Siguiente evento; `None` cuando el stream ha terminado o el
    /// suscriptor cancelo sin nada pendiente.
    pub async fn recv(&self) -> Option<StreamEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut g = self.inner.lock().unwrap();
                if g.done {
                    return None;
                }
                if let Some(ev) = g.strict.pop_front() {
                    if ev.is_terminal() {
                        g.done = true;
                        g.live = None;
                    }
                    return Some(ev);
                }
                if let Some(ev) = g.live.take() {
                    return Some(ev);
                }
                if self.is_cancelled() {
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts: u32) -> LiveSnapshot {
        LiveSnapshot {
            timestamp: ts,
            vehicles: Vec::new(),
            congestion_segments: Vec::new(),
            total_vehicles: 0,
            average_speed: 0.0,
        }
    }

    #[tokio::test]
    async fn live_buffer_keeps_only_latest() {
        let hub = StreamHub::new();
        hub.status("arrancando");
        hub.live(snap(10), "t=10");
        hub.live(snap(20), "t=20");
        hub.live(snap(30), "t=30");

        assert!(matches!(
            hub.recv().await,
            Some(StreamEvent::Status { .. })
        ));
        match hub.recv().await {
            Some(StreamEvent::LiveData { data, .. }) => assert_eq!(data.timestamp, 30),
            other => panic!("esperaba live_data, llego {other:?}"),
        }
    }

    #[tokio::test]
    async fn exactly_one_terminal_event() {
        let hub = StreamHub::new();
        hub.complete(serde_json::json!({"ok": true}));
        hub.error("tarde");
        hub.status("tarde tambien");

        assert!(matches!(
            hub.recv().await,
            Some(StreamEvent::Complete { .. })
        ));
        assert!(hub.recv().await.is_none());
        assert!(hub.recv().await.is_none());
    }

    #[tokio::test]
    async fn terminal_discards_pending_live() {
        let hub = StreamHub::new();
        hub.live(snap(10), "t=10");
        hub.error("fallo");
        assert!(matches!(hub.recv().await, Some(StreamEvent::Error { .. })));
        assert!(hub.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_wakes_and_ends_stream() {
        let hub = StreamHub::new();
        let h = hub.clone();
        let waiter = tokio::spawn(async move { h.recv().await });
        tokio::task::yield_now().await;
        hub.cancel();
        assert!(hub.is_cancelled());
        let got = waiter.await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn recv_waits_for_emit() {
        let hub = StreamHub::new();
        let h = hub.clone();
        let waiter = tokio::spawn(async move { h.recv().await });
        tokio::task::yield_now().await;
        hub.status("hola");
        match waiter.await.unwrap() {
            Some(StreamEvent::Status { message }) => assert_eq!(message, "hola"),
            other => panic!("esperaba status, llego {other:?}"),
        }
    }
}
