use quereus_core::{KeyDef, QuereusError, QuereusResult, Row, Value};
use quereus_keycodec::encode_key;

/// Projects `row` over `key`'s column indices and encodes the result as a
/// byte key. Column order in `key` is preserved, matching how a composite
/// PK or secondary index is declared.
pub fn encode_key_for(key: &KeyDef, row: &Row) -> QuereusResult<Vec<u8>> {
    let values: Vec<Value> = key.column_indices().map(|i| row.get(i).cloned().unwrap_or(Value::Null)).collect();
    encode_key(&values).map_err(|e| QuereusError::Internal { message: e.to_string() })
}

pub fn encode_values(values: &[Value]) -> QuereusResult<Vec<u8>> {
    encode_key(values).map_err(|e| QuereusError::Internal { message: e.to_string() })
}

/// A secondary index's tree key is the indexed columns followed by the
/// row's primary key, so that (a) non-unique index values each get a
/// distinct tree key and (b) a range scan over the indexed prefix still
/// sees every matching row in indexed order, PK order breaking ties.
pub fn encode_secondary_key(index: &KeyDef, pk: &KeyDef, row: &Row) -> QuereusResult<Vec<u8>> {
    let mut values: Vec<Value> = index.column_indices().map(|i| row.get(i).cloned().unwrap_or(Value::Null)).collect();
    values.extend(pk.column_indices().map(|i| row.get(i).cloned().unwrap_or(Value::Null)));
    encode_values(&values)
}
