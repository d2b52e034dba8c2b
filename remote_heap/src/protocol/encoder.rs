use super::types::{Request, Response};
use super::{MAGIC, VERSION};

fn write_header(output: &mut Vec<u8>, op: u8) {
    output.extend_from_slice(&MAGIC.to_le_bytes());
    output.extend_from_slice(&VERSION.to_le_bytes());
    output.push(op);
}

fn write_bytes(output: &mut Vec<u8>, bytes: &[u8]) {
    output.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    output.extend_from_slice(bytes);
}

/// Longest prefix of `tag` that fits the u16 length field and ends on a
/// character boundary.
fn clamp_tag(tag: &str) -> &str {
    let mut end = tag.len().min(u16::MAX as usize);
    while !tag.is_char_boundary(end) {
        end -= 1;
    }
    &tag[..end]
}

pub struct RequestEncoder;

impl RequestEncoder {
    pub fn encode(request: &Request) -> Vec<u8> {
        let mut output = Vec::with_capacity(32);
        write_header(&mut output, request.op_code() as u8);

        match request {
            Request::Create { size, type_tag } => {
                output.extend_from_slice(&size.to_le_bytes());
                let tag = clamp_tag(type_tag).as_bytes();
                output.extend_from_slice(&(tag.len() as u16).to_le_bytes());
                output.extend_from_slice(tag);
            }
            Request::Set { id, value } => {
                output.extend_from_slice(&id.to_le_bytes());
                write_bytes(&mut output, value);
            }
            Request::Get { id }
            | Request::IncreaseRefCount { id }
            | Request::DecreaseRefCount { id } => {
                output.extend_from_slice(&id.to_le_bytes());
            }
        }

        output
    }
}

pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn encode(response: &Response) -> Vec<u8> {
        let mut output = Vec::with_capacity(24 + response.value.len());
        write_header(&mut output, response.op as u8);

        output.push(response.success as u8);
        output.extend_from_slice(&response.id.to_le_bytes());
        write_bytes(&mut output, &response.value);

        match &response.error {
            Some(error) => {
                output.push(1);
                output.extend_from_slice(&error.serialize());
            }
            None => output.push(0),
        }

        output
    }
}
