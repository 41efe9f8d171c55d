//! Binary encoding/decoding of terms and tuple keys
//!
//! Terms are stored as a tag byte followed by length-prefixed UTF-8 fields.
//! Tuple keys are the big-endian concatenation of their node ids taken in an
//! index's column order, so that byte order equals id order.

use crate::core::{NodeId, Tuple};
use crate::error::{Result, StoreError};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{BlankNode, Literal, NamedNode, Term};

/// Width of one encoded key column in bytes
pub const KEY_COLUMN_WIDTH: usize = 8;

const TAG_IRI: u8 = 1;
const TAG_BLANK_NODE: u8 = 2;
const TAG_SIMPLE_LITERAL: u8 = 3;
const TAG_LANG_LITERAL: u8 = 4;
const TAG_TYPED_LITERAL: u8 = 5;

/// Canonical byte encoding of a term, as written to the value log
pub fn encode_term(term: &Term) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(32);
    match term {
        Term::NamedNode(node) => {
            buffer.push(TAG_IRI);
            put_str(&mut buffer, node.as_str());
        }
        Term::BlankNode(node) => {
            buffer.push(TAG_BLANK_NODE);
            put_str(&mut buffer, node.as_str());
        }
        Term::Literal(literal) => {
            if let Some(language) = literal.language() {
                buffer.push(TAG_LANG_LITERAL);
                put_str(&mut buffer, literal.value());
                put_str(&mut buffer, language);
            } else if literal.datatype() == xsd::STRING {
                buffer.push(TAG_SIMPLE_LITERAL);
                put_str(&mut buffer, literal.value());
            } else {
                buffer.push(TAG_TYPED_LITERAL);
                put_str(&mut buffer, literal.value());
                put_str(&mut buffer, literal.datatype().as_str());
            }
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(StoreError::Unsupported(format!(
                "cannot store term {other}"
            )));
        }
    }
    Ok(buffer)
}

/// Inverse of [`encode_term`]
pub fn decode_term(bytes: &[u8]) -> Result<Term> {
    let (&tag, mut rest) = bytes
        .split_first()
        .ok_or_else(|| StoreError::Codec("empty term record".to_string()))?;

    let term = match tag {
        TAG_IRI => NamedNode::new_unchecked(take_str(&mut rest)?).into(),
        TAG_BLANK_NODE => BlankNode::new_unchecked(take_str(&mut rest)?).into(),
        TAG_SIMPLE_LITERAL => Literal::new_simple_literal(take_str(&mut rest)?).into(),
        TAG_LANG_LITERAL => {
            let value = take_str(&mut rest)?;
            let language = take_str(&mut rest)?;
            Literal::new_language_tagged_literal_unchecked(value, language).into()
        }
        TAG_TYPED_LITERAL => {
            let value = take_str(&mut rest)?;
            let datatype = take_str(&mut rest)?;
            Literal::new_typed_literal(value, NamedNode::new_unchecked(datatype)).into()
        }
        other => return Err(StoreError::Codec(format!("unknown term tag {other}"))),
    };

    if !rest.is_empty() {
        return Err(StoreError::Codec(format!(
            "{} trailing bytes after term",
            rest.len()
        )));
    }
    Ok(term)
}

fn put_str(buffer: &mut Vec<u8>, value: &str) {
    buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
}

fn take_str(input: &mut &[u8]) -> Result<String> {
    if input.len() < 4 {
        return Err(StoreError::Codec("truncated length prefix".to_string()));
    }
    let (len_bytes, rest) = input.split_at(4);
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < len {
        return Err(StoreError::Codec(format!(
            "field of {len} bytes runs past end of record"
        )));
    }
    let (value, rest) = rest.split_at(len);
    *input = rest;
    String::from_utf8(value.to_vec()).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Encode a canonical-order tuple as a key in `order`
/// (`order[i]` is the canonical column at key position i)
pub fn encode_key(tuple: &[NodeId], order: &[usize]) -> Vec<u8> {
    let mut key = Vec::with_capacity(order.len() * KEY_COLUMN_WIDTH);
    for &column in order {
        key.extend_from_slice(&tuple[column].as_u64().to_be_bytes());
    }
    key
}

/// Decode a key back into a canonical-order tuple
pub fn decode_key(key: &[u8], order: &[usize]) -> Tuple {
    let mut ids = vec![NodeId::NOT_PRESENT; order.len()];
    for (position, chunk) in key.chunks_exact(KEY_COLUMN_WIDTH).enumerate() {
        let mut raw = [0u8; KEY_COLUMN_WIDTH];
        raw.copy_from_slice(chunk);
        ids[order[position]] = NodeId::new(u64::from_be_bytes(raw));
    }
    Tuple::new(ids)
}

/// Key prefix made of already-ordered leading ids
pub fn encode_prefix(ids: &[NodeId]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(ids.len() * KEY_COLUMN_WIDTH);
    for id in ids {
        prefix.extend_from_slice(&id.as_u64().to_be_bytes());
    }
    prefix
}
