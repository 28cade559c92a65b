//! `!json[...]` payload handler.

use xynq_base::{ScratchArena, StreamReader};
use xynq_slang::PayloadHandler;

/// JSON payload input is not supported; the handler exists so the payload
/// syntax parses up to a well-formed error.
pub struct JsonPayloadHandler;

impl PayloadHandler for JsonPayloadHandler {
    fn process_payload(
        &self,
        _reader: &mut StreamReader<'_>,
        _arena: &ScratchArena,
    ) -> Result<(), String> {
        Err("Not supported".to_string())
    }
}
