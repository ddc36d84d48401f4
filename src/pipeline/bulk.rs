use serde_json::{json, Value};

use crate::types::Document;

/// Encodes one bucket of documents as a newline-delimited bulk request body:
/// an action line carrying only the document id, then the document body, per
/// document in input order. The index and category appear once in the request
/// URL instead of being repeated on every action line.
pub fn encode_bulk(docs: &[Document]) -> String {
    let mut lines = Vec::with_capacity(docs.len() * 2);
    for doc in docs {
        let action = json!({ "index": { "_id": doc.id } });
        lines.push(action.to_string());
        lines.push(Value::Object(doc.body.clone()).to_string());
    }
    // The store requires the trailing newline.
    let mut body = lines.join("\n");
    body.push('\n');
    body
}
