//! Argument sequences: JSON values, each followed by a NUL byte.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{CodecError, Result};

/// Serialize `values` into an argument sequence.
pub fn encode_args(values: &[Value]) -> Result<Bytes> {
    let mut out = BytesMut::new();
    for value in values {
        serde_json::to_writer((&mut out).writer(), value)?;
        out.put_u8(0);
    }
    Ok(out.freeze())
}

/// Split an argument sequence into its raw JSON fields.
///
/// Every field must be NUL-terminated; trailing bytes without a terminator
/// are a format error.
pub fn split_args(args: &[u8]) -> Result<Vec<&[u8]>> {
    let mut fields = Vec::new();
    let mut rest = args;
    while !rest.is_empty() {
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::MissingTerminator { field: "argument" })?;
        fields.push(&rest[..end]);
        rest = &rest[end + 1..];
    }
    Ok(fields)
}

/// Parse an argument sequence into JSON values.
pub fn decode_args(args: &[u8]) -> Result<Vec<Value>> {
    split_args(args)?
        .into_iter()
        .map(|field| serde_json::from_slice(field).map_err(CodecError::from))
        .collect()
}
