//! Captive portal DNS answers.
//!
//! Every query is answered with a single A record pointing at this node's
//! access point, so browsers joining the AP land on the node.

use crate::RouterError;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

/// DNS header length
pub const DNS_HEADER_LEN: usize = 12;

/// Answer TTL in seconds
pub const ANSWER_TTL: u32 = 3600;

/// Turn a query into a response carrying one A record for `address`
pub fn captive_answer(query: &[u8], address: Ipv4Addr) -> Result<Bytes, RouterError> {
    if query.len() < DNS_HEADER_LEN {
        return Err(RouterError::Malformed(format!(
            "DNS query of {} bytes",
            query.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(query.len() + 16);
    buf.extend_from_slice(query);

    // response, authoritative, recursion available
    buf[2] = 0x81;
    buf[3] = 0x80;
    // one answer
    buf[6] = 0x00;
    buf[7] = 0x01;

    // name: pointer to the question at offset 12
    buf.put_u16(0xC00C);
    // type A, class IN
    buf.put_u16(1);
    buf.put_u16(1);
    buf.put_u32(ANSWER_TTL);
    buf.put_u16(4);
    buf.put_slice(&address.octets());

    Ok(buf.freeze())
}
