//! Browser presence binding, run with `wasm-pack test --headless --chrome -- --features wasm`.

#![cfg(all(feature = "wasm", target_arch = "wasm32"))]

use relay_link::{BrowserPresence, NetworkPresenceGate, PresenceState};
use wasm_bindgen_test::*;
use web_sys::VisibilityState;

wasm_bindgen_test_configure!(run_in_browser);

fn browser_state() -> PresenceState {
    let window = web_sys::window().expect("window");
    let document = window.document().expect("document");
    PresenceState {
        network_reachable: window.navigator().on_line(),
        page_visible: document.visibility_state() == VisibilityState::Visible,
    }
}

#[wasm_bindgen_test]
fn test_gate_is_seeded_from_the_page() {
    let gate = NetworkPresenceGate::new(BrowserPresence::new(), false);
    assert_eq!(gate.state(), browser_state());
    assert_eq!(gate.online(), browser_state().online());
}

#[wasm_bindgen_test]
async fn test_wait_for_current_state_resolves() {
    let gate = NetworkPresenceGate::new(BrowserPresence::new(), false);
    gate.wait_for(gate.online()).await;
}

#[wasm_bindgen_test]
fn test_dispose_detaches_browser_listeners() {
    let gate = NetworkPresenceGate::new(BrowserPresence::new(), false);
    gate.dispose();
    gate.dispose();
    assert!(gate.is_disposed());
}
