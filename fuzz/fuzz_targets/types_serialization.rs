#![no_main]

use libfuzzer_sys::fuzz_target;
use refactor_types::*;

fuzz_target!(|data: &[u8]| {
    // Try to parse as JSON and verify serialization roundtrips for the
    // orchestrator's core on-disk/on-wire types.
    if let Ok(json_str) = std::str::from_utf8(data) {
        if let Ok(chunk) = serde_json::from_str::<ChunkData>(json_str) {
            if let Ok(roundtripped) = serde_json::to_string(&chunk) {
                if let Ok(parsed) = serde_json::from_str::<ChunkData>(&roundtripped) {
                    assert_eq!(chunk.number, parsed.number);
                    assert_eq!(chunk.file_path, parsed.file_path);
                }
            }
        }

        if let Ok(record) = serde_json::from_str::<RunRecord>(json_str) {
            if let Ok(roundtripped) = serde_json::to_string(&record) {
                if let Ok(parsed) = serde_json::from_str::<RunRecord>(&roundtripped) {
                    assert_eq!(record.group_index, parsed.group_index);
                    assert_eq!(record.total_groups, parsed.total_groups);
                }
            }
        }

        if let Ok(result) = serde_json::from_str::<OrchestrationResult>(json_str) {
            if let Ok(roundtripped) = serde_json::to_string(&result) {
                if let Ok(parsed) = serde_json::from_str::<OrchestrationResult>(&roundtripped) {
                    assert_eq!(result.run_id, parsed.run_id);
                    assert_eq!(result.groups.len(), parsed.groups.len());
                }
            }
        }
    }
});
