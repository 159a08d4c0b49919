//! Browser presence signals via `web-sys`.

use super::{PresenceSink, PresenceSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::JsCast;
use web_sys::VisibilityState;

fn page_visible() -> bool {
    web_sys::window()
        .and_then(|w| w.document())
        .map(|d| d.visibility_state() == VisibilityState::Visible)
        .unwrap_or(false)
}

/// Feeds `navigator.onLine` and `document.visibilityState` into a gate.
///
/// Listeners are leaked for the page lifetime; after `detach` they become
/// no-ops.
#[derive(Debug, Default)]
pub struct BrowserPresence {
    detached: Arc<AtomicBool>,
}

impl BrowserPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceSource for BrowserPresence {
    fn attach(&mut self, sink: PresenceSink) -> bool {
        let Some(window) = web_sys::window() else {
            return false;
        };
        let Some(document) = window.document() else {
            return false;
        };

        sink.set_network_reachable(window.navigator().on_line());
        sink.set_page_visible(page_visible());

        for (event, reachable) in [("online", true), ("offline", false)] {
            let sink = sink.clone();
            let detached = self.detached.clone();
            let callback = Closure::wrap(Box::new(move || {
                if !detached.load(Ordering::SeqCst) {
                    sink.set_network_reachable(reachable);
                }
            }) as Box<dyn FnMut()>);
            if let Err(e) =
                window.add_event_listener_with_callback(event, callback.as_ref().unchecked_ref())
            {
                log::warn!("[relay-link] Failed to listen for '{}': {:?}", event, e);
            }
            callback.forget();
        }

        let detached = self.detached.clone();
        let on_visibility = Closure::wrap(Box::new(move || {
            if !detached.load(Ordering::SeqCst) {
                sink.set_page_visible(page_visible());
            }
        }) as Box<dyn FnMut()>);
        if let Err(e) = document.add_event_listener_with_callback(
            "visibilitychange",
            on_visibility.as_ref().unchecked_ref(),
        ) {
            log::warn!("[relay-link] Failed to listen for 'visibilitychange': {:?}", e);
        }
        on_visibility.forget();

        true
    }

    fn detach(&mut self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}
