//! Tests for lazy object resolution through `PdfReader`.

mod common;

use common::*;
use quire_core::model::{PdfDict, PdfStream, dict};
use quire_core::security::{Permissions, StandardSecurityHandler};
use quire_core::{ObjRef, PdfError, PdfReader, PdfValue, ReaderBuilder, ReaderOptions, WindowPolicy};
use std::cell::Cell;
use std::io::{Cursor, Write};
use std::rc::Rc;

const DOC_ID: &[u8] = b"\x10\x32\x54\x76\x98\xba\xdc\xfe\x01\x23\x45\x67\x89\xab\xcd\xef";

fn chain_pdf() -> Vec<u8> {
    simple_pdf(&[
        (3, r(4)),
        (4, r(5)),
        (5, string(b"end of chain")),
        (6, r(6)),
    ])
}

/// Encrypted document: catalog 1, pages 2, info 3 (string), stream 4,
/// object stream 6 holding object 5; `/Encrypt` is object 9.
fn encrypted_pdf(user: &str, owner: &str, key_bits: u32) -> (Vec<u8>, StandardSecurityHandler) {
    let handler =
        StandardSecurityHandler::create(user, owner, Permissions::PRINT, key_bits, DOC_ID).unwrap();

    let mut b = PdfBuilder::new();
    b.plain_object(9, &PdfValue::Dictionary(handler.encrypt_dict()));
    b.encrypt_with(handler.clone());
    b.object(1, catalog(2));
    b.object(
        2,
        PdfValue::Dictionary(dict([
            ("Type", name("Pages")),
            ("Kids", PdfValue::Array(vec![])),
            ("Count", int(0)),
        ])),
    );
    b.object(
        3,
        PdfValue::Dictionary(dict([("Title", string(b"Secret report"))])),
    );
    b.object(
        4,
        PdfValue::from(PdfStream::new(PdfDict::new(), b"BT /F1 12 Tf (Hi) Tj ET".to_vec())),
    );
    b.object_stream(6, &[(5, string(b"packed secret"))], true);

    let mut t = trailer(10, 1);
    t.insert("Encrypt".into(), r(9));
    t.insert("Info".into(), r(3));
    t.insert(
        "ID".into(),
        PdfValue::Array(vec![string(DOC_ID), string(DOC_ID)]),
    );
    b.xref_stream(7, t);
    (b.finish(), handler)
}

// --- Resolution ---

#[test]
fn test_dangling_reference_is_null() {
    let reader = open(simple_pdf(&[]));
    assert_eq!(reader.get_object(&r(42)), PdfValue::Null);
    assert!(matches!(
        reader.try_get_object(ObjRef::new(42, 0)),
        Ok(PdfValue::Null)
    ));
}

#[test]
fn test_direct_values_pass_through() {
    let reader = open(simple_pdf(&[]));
    assert_eq!(reader.get_object(&int(7)), int(7));
    assert_eq!(reader.get_object(&PdfValue::Null), PdfValue::Null);
}

#[test]
fn test_reference_chain_is_followed() {
    let reader = open(chain_pdf());
    assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));
    assert_eq!(reader.dereference_by_number(3), r(4));
    assert_eq!(reader.get(ObjRef::new(4, 0)), string(b"end of chain"));
}

#[test]
fn test_reference_depth_bound() {
    let reader = ReaderBuilder::new()
        .max_reference_depth(2)
        .open_bytes(chain_pdf())
        .unwrap();
    assert_eq!(reader.get_object(&r(3)), PdfValue::Null);
    assert_eq!(reader.get_object(&r(4)), string(b"end of chain"));

    let reader = ReaderBuilder::new()
        .max_reference_depth(3)
        .open_bytes(chain_pdf())
        .unwrap();
    assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));
}

#[test]
fn test_self_reference_terminates() {
    let reader = open(chain_pdf());
    assert_eq!(reader.get_object(&r(6)), PdfValue::Null);
}

#[test]
fn test_indirect_stream_length() {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.raw_object(3, 0, b"<</Length 4 0 R>>\nstream\nhello world\nendstream");
    b.object(4, int(11));
    b.xref_table(trailer(5, 1));
    let reader = open(b.finish());

    let stream = reader.get_stream(&r(3)).unwrap();
    assert_eq!(stream.raw_data(), b"hello world");
    assert_eq!(stream.get("Length"), Some(&int(11)));
}

#[test]
fn test_stream_length_referring_to_itself() {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.raw_object(3, 0, b"<</Length 3 0 R>>\nstream\nabc\nendstream");
    b.xref_table(trailer(4, 1));
    let reader = open(b.finish());

    let stream = reader.get_stream(&r(3)).unwrap();
    assert_eq!(stream.raw_data(), b"abc");
}

#[test]
fn test_unparsable_object_is_null() {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.raw_object(3, 0, b"<< /Broken");
    b.raw_object(4, 0, b"4");
    b.xref_table(trailer(5, 1));
    let reader = open(b.finish());

    assert_eq!(reader.get_object(&r(3)), PdfValue::Null);
    assert!(reader.try_get_object(ObjRef::new(3, 0)).is_err());
    // Neighbours are unaffected.
    assert_eq!(reader.get_object(&r(4)), int(4));
}

#[test]
fn test_deeply_nested_object_is_null() {
    let mut body = b"[".repeat(200_000);
    body.extend_from_slice(&b"]".repeat(200_000));

    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.raw_object(3, 0, &body);
    b.raw_object(4, 0, b"[[[4]]]");
    b.xref_table(trailer(5, 1));
    let reader = open(b.finish());

    assert_eq!(reader.get_object(&r(3)), PdfValue::Null);
    assert!(matches!(
        reader.try_get_object(ObjRef::new(3, 0)),
        Err(PdfError::MalformedObject { .. })
    ));
    assert_eq!(
        reader.get_object(&r(4)),
        PdfValue::Array(vec![PdfValue::Array(vec![PdfValue::Array(vec![int(4)])])])
    );
}

#[test]
fn test_wrong_object_header_is_null() {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.raw_object(3, 0, b"3");
    let bytes = b.bytes().to_vec();
    // Object 4's entry points at object 3.
    let at = bytes.windows(7).rposition(|w| w == b"3 0 obj").unwrap() as u64;
    b.entry(4, Entry::InUse(at, 0));
    b.xref_table(trailer(5, 1));
    let reader = open(b.finish());

    assert_eq!(reader.get_object(&r(3)), int(3));
    assert_eq!(reader.get_object(&r(4)), PdfValue::Null);
}

#[test]
fn test_offset_past_end_is_null() {
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.entry(3, Entry::InUse(1 << 30, 0));
    b.xref_table(trailer(4, 1));
    let reader = open(b.finish());
    assert_eq!(reader.get_object(&r(3)), PdfValue::Null);
}

#[test]
fn test_large_stream_grows_window() {
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.object(3, PdfValue::from(PdfStream::new(PdfDict::new(), body.clone())));
    b.xref_table(trailer(4, 1));
    let reader = ReaderBuilder::new()
        .window(WindowPolicy {
            initial: 256,
            max: 1 << 20,
        })
        .open_bytes(b.finish())
        .unwrap();

    let stream = reader.get_stream(&r(3)).unwrap();
    assert_eq!(stream.raw_data(), &body[..]);
}

#[test]
fn test_window_limit_makes_object_unreadable() {
    let body = vec![b'x'; 10_000];
    let mut b = PdfBuilder::new();
    b.object(1, catalog(2));
    b.object(3, PdfValue::from(PdfStream::new(PdfDict::new(), body)));
    b.object(4, int(4));
    b.xref_table(trailer(5, 1));
    let reader = ReaderBuilder::new()
        .window(WindowPolicy {
            initial: 64,
            max: 4096,
        })
        .open_bytes(b.finish())
        .unwrap();

    assert_eq!(reader.get_object(&r(3)), PdfValue::Null);
    assert_eq!(reader.get_object(&r(4)), int(4));
}

// --- Cache ---

#[test]
fn test_bounded_cache_still_resolves() {
    let reader = ReaderBuilder::new()
        .cache_capacity(1)
        .open_bytes(chain_pdf())
        .unwrap();
    for _ in 0..3 {
        assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));
        assert_eq!(reader.get_object(&r(5)), string(b"end of chain"));
    }

    let reader = ReaderBuilder::new()
        .cache_capacity(0)
        .open_bytes(chain_pdf())
        .unwrap();
    assert_eq!(reader.get_object(&r(5)), string(b"end of chain"));
    assert_eq!(reader.get_object(&r(5)), string(b"end of chain"));
}

// --- Lifecycle ---

#[test]
fn test_dispose_is_idempotent() {
    let reader = open(chain_pdf());
    assert_eq!(reader.get_object(&r(5)), string(b"end of chain"));
    assert!(!reader.is_disposed());

    reader.dispose();
    reader.dispose();
    assert!(reader.is_disposed());
    assert_eq!(reader.get_object(&r(5)), PdfValue::Null);
    assert!(matches!(
        reader.try_get_object(ObjRef::new(5, 0)),
        Err(PdfError::Disposed)
    ));
    // Cross-reference data stays available.
    assert_eq!(reader.object_numbers(), vec![1, 2, 3, 4, 5, 6]);
}

// --- Sources ---

#[test]
fn test_open_path_memory_mapped() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&chain_pdf()).unwrap();
    file.flush().unwrap();

    let reader = PdfReader::open(file.path()).unwrap();
    assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));
    assert_eq!(reader.len(), chain_pdf().len() as u64);
}

#[test]
fn test_open_path_without_mmap() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&chain_pdf()).unwrap();
    file.flush().unwrap();

    let reader = ReaderBuilder::new()
        .use_mmap(false)
        .open(file.path())
        .unwrap();
    assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));
    reader.dispose();
    assert_eq!(reader.get_object(&r(4)), PdfValue::Null);
}

#[test]
fn test_open_missing_path() {
    assert!(matches!(
        PdfReader::open("/definitely/not/here.pdf"),
        Err(PdfError::Io(_))
    ));
}

#[test]
fn test_from_reader() {
    let reader = PdfReader::from_reader(Cursor::new(chain_pdf()), ReaderOptions::default()).unwrap();
    assert_eq!(reader.get_object(&r(3)), string(b"end of chain"));

    let reader = ReaderBuilder::new()
        .open_reader(Cursor::new(chain_pdf()))
        .unwrap();
    assert_eq!(reader.get_object(&r(5)), string(b"end of chain"));
}

#[test]
fn test_empty_input() {
    assert!(PdfReader::from_bytes(Vec::new()).is_err());
}

// --- Introspection ---

#[test]
fn test_unencrypted_introspection() {
    let reader = open(simple_pdf(&[]));
    assert!(!reader.is_encrypted());
    assert_eq!(reader.permissions(), -1);
    assert!(reader.encryption().is_none());
    assert!(reader.file_id().is_empty());
    assert_eq!(reader.info(), PdfValue::Null);
    assert!(!reader.is_empty());
}

// --- Encryption ---

#[test]
fn test_encrypted_document_with_user_password() {
    let (data, handler) = encrypted_pdf("user", "owner", 128);
    let reader = ReaderBuilder::new().password("user").open_bytes(data).unwrap();

    assert!(reader.is_encrypted());
    assert_eq!(reader.permissions(), handler.permissions());
    assert_eq!(reader.encryption(), Some(handler.state()));
    assert_eq!(reader.file_id(), DOC_ID);

    assert_eq!(reader.info().get("Title"), Some(&string(b"Secret report")));
    let stream = reader.get_stream(&r(4)).unwrap();
    assert!(stream.is_decrypted());
    assert_eq!(stream.raw_data(), b"BT /F1 12 Tf (Hi) Tj ET");
    assert_eq!(reader.get_object(&r(5)), string(b"packed secret"));
}

#[test]
fn test_encrypt_dictionary_is_read_in_the_clear() {
    let (data, handler) = encrypted_pdf("", "owner", 40);
    let reader = open(data);
    let encrypt = reader.get_object(&r(9));
    assert_eq!(encrypt.get("O"), Some(&PdfValue::String(handler.o_value().to_vec())));
    assert_eq!(encrypt.get("U"), Some(&PdfValue::String(handler.u_value().to_vec())));
}

#[test]
fn test_empty_user_password_opens_without_password() {
    let (data, _) = encrypted_pdf("", "owner", 40);
    let reader = open(data);
    assert_eq!(reader.info().get("Title"), Some(&string(b"Secret report")));
}

#[test]
fn test_owner_password_opens_document() {
    let (data, _) = encrypted_pdf("user", "owner", 128);
    let reader = ReaderBuilder::new().password("owner").open_bytes(data).unwrap();
    assert_eq!(reader.get_object(&r(5)), string(b"packed secret"));
}

#[test]
fn test_wrong_password_fails_to_open() {
    let (data, _) = encrypted_pdf("user", "owner", 128);
    assert!(matches!(
        ReaderBuilder::new().password("guess").open_bytes(data.clone()),
        Err(PdfError::Encryption(_))
    ));
    assert!(matches!(
        PdfReader::from_bytes(data),
        Err(PdfError::Encryption(_))
    ));
}

#[test]
fn test_password_callback_retries() {
    let (data, _) = encrypted_pdf("user", "owner", 64);
    let attempts = Rc::new(Cell::new(0));
    let seen = Rc::clone(&attempts);
    let reader = ReaderBuilder::new()
        .password("first guess")
        .on_password(move |attempt| {
            seen.set(attempt);
            match attempt {
                1 => Some("second guess".to_string()),
                2 => Some("user".to_string()),
                _ => None,
            }
        })
        .open_bytes(data)
        .unwrap();

    assert_eq!(attempts.get(), 2);
    assert_eq!(reader.info().get("Title"), Some(&string(b"Secret report")));
}

#[test]
fn test_password_callback_gives_up() {
    let (data, _) = encrypted_pdf("user", "owner", 128);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let result = ReaderBuilder::new()
        .on_password(move |_| {
            counter.set(counter.get() + 1);
            None
        })
        .open_bytes(data);

    assert!(matches!(result, Err(PdfError::Encryption(_))));
    assert_eq!(calls.get(), 1);
}
