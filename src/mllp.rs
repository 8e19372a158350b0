//! MLLP framing for a Tokio stream.
//!
//! HL7's Minimal Lower Layer Protocol wraps every message as
//! `<VT> payload <FS><CR>`. [`MllpCodec`] strips and adds that framing so the rest of the crate
//! only ever sees the HL7 text itself.

use bytes::buf::{Buf, BufMut};
use bytes::BytesMut;
use log::{debug, trace};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Largest payload accepted by [`MllpCodec::new`].
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Tokio codec for MLLP frames, used for both the ADT message and the acknowledgment.
#[derive(Debug)]
pub struct MllpCodec {
    // A frame may straddle several reads, so the start of it is kept here until the footer shows up
    pending: BytesMut,
    max_frame_length: usize,
}

impl Default for MllpCodec {
    fn default() -> Self {
        MllpCodec::new()
    }
}

impl MllpCodec {
    const BLOCK_HEADER: u8 = 0x0B; //Vertical-Tab char, the marker for the start of a message
    const BLOCK_FOOTER: [u8; 2] = [0x1C, 0x0D]; //File-Separator char + CR, the marker for the end of a message

    /// Creates a codec accepting payloads up to [`DEFAULT_MAX_FRAME_LENGTH`] bytes.
    /// ```
    /// use hl7_adt_link::MllpCodec;
    /// let mllp = MllpCodec::new();
    /// ```
    pub fn new() -> Self {
        MllpCodec::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a codec that fails the read once a frame grows beyond `max_frame_length` payload bytes.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        MllpCodec {
            pending: BytesMut::new(),
            max_frame_length,
        }
    }

    fn get_footer_position(src: &[u8]) -> Option<usize> {
        let position = src.windows(2).position(|w| w == MllpCodec::BLOCK_FOOTER);
        trace!("MLLP: footer position {:?}", position);
        position
    }
}

impl Encoder<BytesMut> for MllpCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(payload.len() + 3); //header + 2 footer bytes
        dst.put_u8(MllpCodec::BLOCK_HEADER);
        dst.put_slice(&payload);
        dst.put_slice(&MllpCodec::BLOCK_FOOTER);

        debug!("MLLP: Encoded value for send: '{:?}'", dst);
        Ok(())
    }
}

impl Decoder for MllpCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Everything is moved into the local buffer so no unread bytes are left on the stream
        self.pending.reserve(src.len());
        self.pending.put_slice(src);
        src.advance(src.len());

        // bytes prior to the header are ignored
        match self
            .pending
            .iter()
            .position(|b| *b == MllpCodec::BLOCK_HEADER)
        {
            Some(0) => {}
            Some(start) => {
                trace!("MLLP: Skipping {} bytes before the block header", start);
                self.pending.advance(start);
            }
            None => {
                trace!("MLLP: No block header yet, dropping {} bytes", self.pending.len());
                self.pending.clear();
                return Ok(None);
            }
        }

        match MllpCodec::get_footer_position(&self.pending[1..]) {
            Some(end) => {
                let mut frame = self.pending.split_to(end + 3);
                frame.advance(1);
                frame.truncate(end);

                // one message per exchange, trailing data is not ours to interpret
                self.pending.clear();
                Ok(Some(frame))
            }
            None if self.pending.len() > self.max_frame_length + 1 => {
                let size = self.pending.len() - 1;
                self.pending.clear();
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "MLLP frame of {} bytes exceeds the {} byte limit",
                        size, self.max_frame_length
                    ),
                ))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.pending.is_empty() => Ok(None),
            None => {
                let size = self.pending.len();
                self.pending.clear();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed inside an MLLP frame ({} bytes read)", size),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn wrap_for_mllp(s: &str) -> Bytes {
        Bytes::from(format!("\x0B{}\x1C\x0D", s))
    }

    fn wrap_for_mllp_mut(s: &str) -> BytesMut {
        BytesMut::from(format!("\x0B{}\x1C\x0D", s).as_str())
    }

    #[test]
    fn implements_default() {
        let m = MllpCodec::default();
        assert_eq!(m.max_frame_length, DEFAULT_MAX_FRAME_LENGTH);
    }

    #[test]
    fn wraps_simple_data() {
        let data = BytesMut::from("abcd");
        let mut m = MllpCodec::new();

        let mut output_buf = BytesMut::with_capacity(64);

        match m.encode(data, &mut output_buf) {
            Ok(()) => {}
            _ => panic!("Non OK value returned from encode"),
        }
        assert_eq!(output_buf.freeze(), wrap_for_mllp("abcd"));
    }

    #[test]
    fn find_footer_location() {
        let data = wrap_for_mllp_mut("abcd"); //footer at position 5, as there's a leading byte added
        assert_eq!(MllpCodec::get_footer_position(&data), Some(5));
    }

    #[test]
    fn missing_footer_detected() {
        let data = BytesMut::from("no footer");
        assert_eq!(MllpCodec::get_footer_position(&data), None);
    }

    #[test]
    fn ensure_decoder_finds_simple_message() {
        let mut data = wrap_for_mllp_mut("abcd");
        let mut m = MllpCodec::new();

        match m.decode(&mut data) {
            Ok(Some(message)) => assert_eq!(&message[..], b"abcd"),
            Ok(None) => panic!("Failed to find a simple message!"),
            Err(err) => panic!("Error looking for simple message: {:?}", err),
        }
    }

    #[test]
    fn ensure_leading_noise_is_ignored() {
        let mut data = BytesMut::from("garbage\x0BMSH\x1C\x0D");
        let mut m = MllpCodec::new();

        match m.decode(&mut data) {
            Ok(Some(message)) => assert_eq!(&message[..], b"MSH"),
            other => panic!("Unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn ensure_data_after_end_is_ignored() {
        let mut data = BytesMut::from("\x0BTest Data\x1C\x0DMore Data");
        let mut m = MllpCodec::new();

        match m.decode(&mut data) {
            Ok(Some(message)) => assert_eq!(&message[..], b"Test Data"),
            _ => panic!("Failure for message with illegal trailing data"),
        }
        assert!(m.pending.is_empty());
    }

    #[test]
    fn ensure_no_data_is_left_on_the_stream() {
        let mut data = BytesMut::from("\x0BTest Data\x1C\x0D");
        let mut m = MllpCodec::new();

        let _result = m.decode(&mut data);

        assert_eq!(data.len(), 0, "Decoder left data sitting in the buffer after read!");
    }

    #[test]
    fn ensure_buffer_is_reset_per_message() {
        let mut mllp = MllpCodec::new();

        let mut data1 = wrap_for_mllp_mut("Test Data");
        let mut data2 = wrap_for_mllp_mut("This is different");

        match mllp.decode(&mut data1) {
            Ok(Some(message)) => assert_eq!(&message[..], b"Test Data"),
            _ => panic!("Error decoding first message"),
        }

        match mllp.decode(&mut data2) {
            Ok(Some(message)) => assert_eq!(&message[..], b"This is different"),
            _ => panic!("Error decoding second message"),
        }
    }

    #[test]
    fn test_real_message() {
        let mut mllp = MllpCodec::new();
        let mut data = wrap_for_mllp_mut("MSH|^~\\&|RECEPTION|HOSPITAL|HIS|HOSPITAL|20240301101500||ADT^A01^ADT_A01|1709287000001|P|2.5\rEVN|A01|20240301101500\rPID|||42||Petrov^Ivan||19900501");

        match mllp.decode(&mut data) {
            Ok(Some(message)) => {
                assert!(message.starts_with(b"MSH|"));
                assert!(message.ends_with(b"19900501"));
            }
            _ => panic!("Error decoding ADT message"),
        }
    }

    #[test]
    fn test_message_split_over_multiple_calls() {
        let mut mllp = MllpCodec::new();
        let mut call1 = BytesMut::from("\x0BTest");
        let mut call2 = BytesMut::from(" Data\x1C");
        let mut call3 = BytesMut::from("\x0D");

        match mllp.decode(&mut call1) {
            Ok(None) => {}
            _ => panic!("Data returned from call to decode() without footer!"),
        }

        match mllp.decode(&mut call2) {
            Ok(None) => {}
            _ => panic!("Data returned from call to decode() with half a footer!"),
        }

        match mllp.decode(&mut call3) {
            Ok(Some(message)) => assert_eq!(&message[..], b"Test Data"),
            Ok(None) => panic!("decode didn't find a message on the third call..."),
            Err(err) => panic!("Unexpected error when decoding split packets: {:?}", err),
        }
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut mllp = MllpCodec::with_max_frame_length(4);
        let mut data = BytesMut::from("\x0Babcdefgh");

        let err = mllp.decode(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(mllp.pending.is_empty());
    }

    #[test]
    fn eof_inside_a_frame_is_an_error() {
        let mut mllp = MllpCodec::new();
        let mut data = BytesMut::from("\x0BMSH|^~\\&");

        let err = mllp.decode_eof(&mut data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn eof_with_nothing_pending_ends_the_stream() {
        let mut mllp = MllpCodec::new();
        let mut data = BytesMut::new();

        assert!(mllp.decode_eof(&mut data).unwrap().is_none());
    }
}
