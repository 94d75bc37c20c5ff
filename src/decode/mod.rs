//! Message decoding: MIME structure, transfer encodings, charsets,
//! encoded-word headers and HTML-to-text.

pub mod charset;
pub mod header;
pub mod html;
pub mod mime;

pub use charset::{UnsupportedEncoding, decode_charset};
pub use header::{decode_header, decode_header_bytes};
pub use html::html_to_text;
pub use mime::{TransferError, decode_record, decode_transfer};
