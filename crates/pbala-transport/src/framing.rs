//! Self-delimiting frames: a 4-byte big-endian length prefix followed by a
//! `bincode`-encoded [`Envelope`]. A short read on the body is retried by
//! `Read::read_exact` until the declared length is consumed or the
//! connection drops, so a frame is never observed half-delivered.

use anyhow::{Context, Result};
use pbala_base::proto::Envelope;
use std::io::{Read, Write};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub fn write_frame(writer: &mut impl Write, envelope: &Envelope) -> Result<()> {
    let body = bincode::serialize(envelope).context("encoding envelope")?;
    let len: u32 = body
        .len()
        .try_into()
        .context("envelope body exceeds the 4 GiB frame length field")?;
    writer
        .write_all(&len.to_be_bytes())
        .context("writing frame length prefix")?;
    writer.write_all(&body).context("writing frame body")?;
    writer.flush().context("flushing frame")?;
    Ok(())
}

/// Reads one frame, or returns `Ok(None)` if the peer closed the connection
/// cleanly before any bytes of a new frame arrived (a closed connection
/// mid-frame is still an error).
pub fn read_frame(reader: &mut impl Read) -> Result<Option<Envelope>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("reading frame length prefix"),
    }
    let len = u32::from_be_bytes(len_bytes);
    anyhow::ensure!(
        len <= MAX_FRAME_LEN,
        "frame length {len} exceeds the {MAX_FRAME_LEN} byte cap"
    );
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .context("reading frame body")?;
    let envelope = bincode::deserialize(&body).context("decoding envelope")?;
    Ok(Some(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbala_base::proto::WorkMessage;
    use pbala_base::WorkerId;
    use std::io::Cursor;

    #[test]
    fn write_then_read_round_trips() {
        let envelope: Envelope = WorkMessage::Stop.into();
        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn read_frame_on_empty_stream_returns_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn read_frame_on_truncated_body_errors() {
        let envelope: Envelope = pbala_base::proto::GreetingMessage {
            worker_id: WorkerId(1),
            task_type: pbala_base::TaskType::C,
            max_task_size_kib: None,
            create_err: false,
            create_mem: false,
            custom_path: None,
        }
        .into();
        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }
}
