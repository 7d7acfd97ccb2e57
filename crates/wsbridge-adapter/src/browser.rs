//! Browser host backed by `web_sys::WebSocket`

use crate::error::{AdapterError, AdapterResult};
use crate::event::{ClosePayload, ErrorPayload, EventSender, TransportEvent};
use crate::host::{Host, HostSocket};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::js_sys::{ArrayBuffer, Uint8Array};
use web_sys::{BinaryType, CloseEvent, ErrorEvent, Event, MessageEvent, WebSocket};

/// Opens sockets with the page's `WebSocket` constructor and runs tasks on
/// the browser event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserHost;

struct Callbacks {
    _on_open: Closure<dyn FnMut(Event)>,
    _on_error: Closure<dyn FnMut(Event)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
}

pub struct BrowserSocket {
    ws: WebSocket,
    callbacks: RefCell<Option<Callbacks>>,
}

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

impl Host for BrowserHost {
    type Socket = BrowserSocket;

    fn open(&self, url: &str, events: EventSender) -> AdapterResult<BrowserSocket> {
        let ws = WebSocket::new(url).map_err(|e| AdapterError::ConnectFailed(describe(&e)))?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let on_open = {
            let events = events.clone();
            Closure::<dyn FnMut(Event)>::new(move |_: Event| {
                events.push(TransportEvent::Opened);
            })
        };
        let on_error = {
            let events = events.clone();
            Closure::<dyn FnMut(Event)>::new(move |event: Event| {
                let message = event
                    .dyn_ref::<ErrorEvent>()
                    .map(ErrorEvent::message)
                    .filter(|m| !m.is_empty());
                events.push(TransportEvent::Error(ErrorPayload { message }));
            })
        };
        let on_close = {
            let events = events.clone();
            Closure::<dyn FnMut(CloseEvent)>::new(move |event: CloseEvent| {
                events.push(TransportEvent::Closed(ClosePayload {
                    code: event.code(),
                    reason: event.reason(),
                }));
            })
        };
        let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let data = event.data();
            if let Some(buffer) = data.dyn_ref::<ArrayBuffer>() {
                events.push(TransportEvent::Data(Uint8Array::new(buffer).to_vec()));
            } else if let Some(text) = data.as_string() {
                events.push(TransportEvent::Data(text.into_bytes()));
            }
        });

        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        Ok(BrowserSocket {
            ws,
            callbacks: RefCell::new(Some(Callbacks {
                _on_open: on_open,
                _on_error: on_error,
                _on_close: on_close,
                _on_message: on_message,
            })),
        })
    }

    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

impl HostSocket for BrowserSocket {
    fn send(&self, data: &[u8]) -> AdapterResult<()> {
        self.ws
            .send_with_u8_array(data)
            .map_err(|e| AdapterError::SendFailed(describe(&e)))
    }

    fn close(&self) {
        // Unhook before the closures are dropped; a callback firing into a
        // freed closure throws in the page.
        self.ws.set_onopen(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
        self.ws.set_onmessage(None);
        let _ = self.ws.close();
        self.callbacks.borrow_mut().take();
    }
}
