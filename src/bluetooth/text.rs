use encoding_rs::GBK;

use crate::bluetooth::constants::TEXT_TRAILER;

/// Encodes one line of text for the printer: GBK bytes followed by LF, CR and NUL.
///
/// Characters GBK cannot represent are written as numeric character references (`&#...;`).
pub fn encode_text_line(text: &str) -> Vec<u8> {
    let (encoded, _, _) = GBK.encode(text);

    let mut bytes = Vec::with_capacity(encoded.len() + TEXT_TRAILER.len());
    bytes.extend_from_slice(&encoded);
    bytes.extend_from_slice(&TEXT_TRAILER);
    bytes
}
