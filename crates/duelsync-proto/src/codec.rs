use crate::{
    constants::HEADER_LEN,
    error::ProtoError,
    header::Header,
    limits::max_payload_for,
    messages::Message,
    msg_id::MsgId,
};

/// A decoded packet borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub header: Header,
    pub msg_id: MsgId,
    pub payload: &'a [u8],
}

/// Encode a message that implements the [`Message`] trait into one packet.
///
/// The header is built from the message type's `msg_id()`, and the payload
/// limit is selected based on the message type.
pub fn encode_message<T: Message>(payload: &T) -> Result<Vec<u8>, ProtoError> {
    let msg_id = T::msg_id();

    let payload_bytes = postcard::to_stdvec(payload)?;
    if payload_bytes.len() > max_payload_for(msg_id) {
        return Err(ProtoError::PayloadTooLarge(payload_bytes.len()));
    }

    let mut header = Header::new(msg_id as u8);
    header.payload_len = payload_bytes.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    let mut hbuf = [0u8; HEADER_LEN];
    header.encode_into(&mut hbuf);
    out.extend_from_slice(&hbuf);
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Validate the header of one packet and resolve its message id.
pub fn decode_packet(buf: &[u8]) -> Result<PacketView<'_>, ProtoError> {
    let (header, payload) = Header::decode(buf)?;
    let msg_id = MsgId::from_repr(header.msg_id).ok_or(ProtoError::UnknownMsgId(header.msg_id))?;
    if payload.len() > max_payload_for(msg_id) {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }
    Ok(PacketView {
        header,
        msg_id,
        payload,
    })
}
