#![no_main]

use fira_core::event::Event;
use fira_core::params::{ControleeUpdate, RangingParams, ReconfigureCommand};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

// Every decoder the device callbacks and RPC payloads go through must reject
// malformed input with an error, never a panic, and anything it accepts must
// survive a re-encode.
fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    if let Ok(event) = Event::from_callback_json(&value) {
        assert!(event.session_id.is_none() || !event.name.is_adapter_state());
    }

    if let Ok(params) = RangingParams::from_wire(&value) {
        if params.validate().is_ok() {
            let wire = params.to_wire().expect("valid params encode");
            let again = RangingParams::from_wire(&wire).expect("re-decode");
            assert_eq!(again, params);
        }
    }

    if let Ok(command) = ReconfigureCommand::from_wire(&value) {
        let again = ReconfigureCommand::from_wire(&command.to_wire()).expect("re-decode");
        assert_eq!(again, command);
    }

    if let Ok(update) = ControleeUpdate::from_wire(&value) {
        assert!(!update.addresses().is_empty());
    }
});
