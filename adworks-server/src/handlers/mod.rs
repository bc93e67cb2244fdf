pub mod assets;
pub mod composites;
pub mod system;

pub(crate) fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "code": "error", "message": message } })
}
