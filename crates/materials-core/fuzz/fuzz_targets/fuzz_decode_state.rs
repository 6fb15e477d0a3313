#![no_main]
use libfuzzer_sys::fuzz_target;
use materials_core::resources::RegionResources;
use materials_core::manager::MaterialsDataManager;
use materials_core::serialize::decode_state;

fuzz_target!(|data: &[u8]| {
    // Must not panic -- returning Err is fine. Anything that decodes has
    // passed state validation and must build a store.
    if let Ok((_, state)) = decode_state(data) {
        let _ = MaterialsDataManager::new(&state, Box::new(RegionResources::new()));
    }
});
