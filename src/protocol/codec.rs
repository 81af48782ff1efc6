//! Frame encoding and decoding
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! string     := u16 length, UTF-8 bytes
//! bare frame := string
//! TEXT       := string("TEXT"), string(body)
//! IMAGE      := string("IMAGE"), string(filename), u32 size, size raw bytes
//! ```
//!
//! `Identity` and `Exit` are written as bare strings in both dialects.

use crate::error::{FramingError, NetworkError, ParlorError, Result};
use crate::protocol::dialect::{Dialect, FrameTag};
use crate::protocol::{is_exit_sentinel, Frame, EXIT_SENTINEL, MAX_ATTACHMENT_SIZE, MAX_STRING_LEN};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a frame into its wire bytes
///
/// # Errors
///
/// Fails if a string exceeds [`MAX_STRING_LEN`] bytes, if an attachment
/// exceeds [`MAX_ATTACHMENT_SIZE`], or if the frame kind cannot be expressed
/// in `dialect`. A `Text` body equal to the exit sentinel (any case) is
/// refused with [`FramingError::ReservedText`]; build chat lines with
/// [`Frame::text`], which maps it to [`Frame::Exit`].
///
/// # Example
///
/// ```
/// use parlor::protocol::{encode, Dialect, Frame};
///
/// let bytes = encode(&Frame::Text("hi".into()), Dialect::Bare).unwrap();
/// assert_eq!(bytes, vec![0, 2, b'h', b'i']);
/// ```
pub fn encode(frame: &Frame, dialect: Dialect) -> std::result::Result<Vec<u8>, FramingError> {
    let mut buf = Vec::new();

    match frame {
        Frame::Identity(name) => put_string(&mut buf, name)?,
        Frame::Exit => put_string(&mut buf, EXIT_SENTINEL)?,
        Frame::Text(body) => {
            if is_exit_sentinel(body) {
                return Err(FramingError::ReservedText(body.clone()));
            }
            if dialect == Dialect::Typed {
                put_string(&mut buf, FrameTag::Text.as_str())?;
            }
            put_string(&mut buf, body)?;
        },
        Frame::Attachment { filename, data } => {
            if !dialect.supports_attachments() {
                return Err(FramingError::Unsupported {
                    frame: frame.kind(),
                    dialect: dialect.name(),
                });
            }
            if data.len() > MAX_ATTACHMENT_SIZE {
                return Err(FramingError::AttachmentTooLarge {
                    size: data.len(),
                    max: MAX_ATTACHMENT_SIZE,
                });
            }
            put_string(&mut buf, FrameTag::Image.as_str())?;
            put_string(&mut buf, filename)?;
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            buf.extend_from_slice(data);
        },
    }

    Ok(buf)
}

/// Encode `frame` and write it to `writer` in one `write_all`, then flush
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, dialect: Dialect) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(frame, dialect)?;

    writer
        .write_all(&bytes)
        .await
        .map_err(|e| NetworkError::SendFailed {
            reason: format!("Failed to write {} frame: {}", frame.kind(), e),
        })?;

    writer.flush().await.map_err(|e| NetworkError::SendFailed {
        reason: format!("Failed to flush: {}", e),
    })?;

    Ok(())
}

/// Read exactly one frame from `reader`
///
/// `expect_identity` marks the session's first inbound frame: an untagged,
/// non-sentinel string then decodes as [`Frame::Identity`] instead of
/// [`Frame::Text`].
///
/// # Errors
///
/// - [`NetworkError::ConnectionReset`] if the stream ends before the frame starts
/// - [`FramingError::Truncated`] if it ends mid-frame
/// - [`FramingError::AttachmentTooLarge`] / [`FramingError::InvalidUtf8`] on bad input
pub async fn read_frame<R>(reader: &mut R, dialect: Dialect, expect_identity: bool) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let first = read_leading_string(reader).await?;

    if dialect == Dialect::Typed {
        match FrameTag::parse(&first) {
            Some(FrameTag::Text) => {
                let body = read_string(reader).await?;
                return Ok(Frame::text(body));
            },
            Some(FrameTag::Image) => {
                let filename = read_string(reader).await?;
                let size = reader.read_u32().await.map_err(mid_frame_error)? as usize;
                if size > MAX_ATTACHMENT_SIZE {
                    return Err(FramingError::AttachmentTooLarge {
                        size,
                        max: MAX_ATTACHMENT_SIZE,
                    }
                    .into());
                }
                let mut data = vec![0u8; size];
                reader.read_exact(&mut data).await.map_err(mid_frame_error)?;
                return Ok(Frame::Attachment { filename, data });
            },
            None => {},
        }
    }

    if is_exit_sentinel(&first) {
        Ok(Frame::Exit)
    } else if expect_identity {
        Ok(Frame::Identity(first))
    } else {
        Ok(Frame::Text(first))
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> std::result::Result<(), FramingError> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(FramingError::StringTooLong(bytes.len()));
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Read the string that opens a frame; EOF on its first byte is a clean close
async fn read_leading_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let hi = reader.read_u8().await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ParlorError::from(NetworkError::ConnectionReset)
        } else {
            receive_failed(e)
        }
    })?;
    let lo = reader.read_u8().await.map_err(mid_frame_error)?;
    read_string_body(reader, u16::from_be_bytes([hi, lo]) as usize).await
}

async fn read_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await.map_err(mid_frame_error)? as usize;
    read_string_body(reader, len).await
}

async fn read_string_body<R>(reader: &mut R, len: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await.map_err(mid_frame_error)?;
    String::from_utf8(bytes).map_err(|_| FramingError::InvalidUtf8.into())
}

fn mid_frame_error(e: std::io::Error) -> ParlorError {
    if e.kind() == ErrorKind::UnexpectedEof {
        FramingError::Truncated.into()
    } else {
        receive_failed(e)
    }
}

fn receive_failed(e: std::io::Error) -> ParlorError {
    NetworkError::ReceiveFailed {
        reason: e.to_string(),
    }
    .into()
}
