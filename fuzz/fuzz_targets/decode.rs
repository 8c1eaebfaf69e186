#![no_main]
use futures_executor::block_on;
use libfuzzer_sys::fuzz_target;
use wrapped_pack::Engine;

fuzz_target!(|data: &[u8]| {
    let engine = Engine::default();
    if let Ok(value) = block_on(engine.decode(data)) {
        let _ = engine.format(&value);
    }
});
