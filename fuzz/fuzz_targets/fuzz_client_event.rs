#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<code_duel_client::protocol::ClientEventMsg>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<code_duel_client::protocol::ClientEventMsg>(s);
    }
});
