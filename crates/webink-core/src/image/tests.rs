use alloc::vec::Vec;

use super::*;

fn with_payload(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut bytes = header.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn binary_bitmap_rows_are_zero_copy_views() {
    let bytes = with_payload(b"P4\n4 4\n", &[0xF0, 0x00, 0xA0, 0x50, 0, 0, 0, 0]);

    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(header.format, ImageFormat::P4);
    assert_eq!((header.width, header.height), (4, 4));
    assert_eq!(header.max_value, 1);
    assert_eq!(header.color_mode, ColorMode::Mono);
    assert_eq!(header.header_bytes, 7);
    assert_eq!(header.data_bytes, 4);

    let pixels = ImageDecoder::parse_rows(&bytes, &header, 0, 4).unwrap();
    assert!(pixels.is_zero_copy());
    assert_eq!(pixels.stride, 1);
    for row in 0..4u16 {
        let expected = &bytes[header.header_bytes + row as usize * pixels.stride];
        assert!(core::ptr::eq(pixels.row(row).unwrap().as_ptr(), expected));
    }
    assert_eq!(pixels.row(4), None);
}

#[test]
fn header_skips_bom_and_comments() {
    let bytes = with_payload(b"\xEF\xBB\xBF# made by server\nP5\n# size\n2 1\n255\n", &[7, 9]);

    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(header.format, ImageFormat::P5);
    assert_eq!(header.max_value, 255);
    assert_eq!(header.data_bytes, 2);

    let pixels = ImageDecoder::parse_rows(&bytes, &header, 0, 0).unwrap();
    assert_eq!(pixels.bytes(), &[7, 9]);
}

#[test]
fn binary_payload_that_looks_like_whitespace_is_kept() {
    let bytes = with_payload(b"P5\n2 1\n255\n", b" #");

    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(header.header_bytes, 11);

    let pixels = ImageDecoder::parse_rows(&bytes, &header, 0, 1).unwrap();
    assert_eq!(pixels.row(0), Some(&b" #"[..]));
}

#[test]
fn malformed_headers_are_rejected() {
    assert_eq!(ImageDecoder::parse_header(b"P4\n1 1\n"), Err(DecodeError::TooShort));
    assert_eq!(
        ImageDecoder::parse_header(b"P7\n10 10\n255\n"),
        Err(DecodeError::UnknownFormat)
    );
    assert_eq!(
        ImageDecoder::parse_header(b"GIF89a......"),
        Err(DecodeError::UnknownFormat)
    );
    assert_eq!(
        ImageDecoder::parse_header(b"P4\n0 10\n\0\0\0"),
        Err(DecodeError::InvalidDimensions)
    );
    assert_eq!(
        ImageDecoder::parse_header(b"P5\n10 10\n0\n\0\0"),
        Err(DecodeError::InvalidDimensions)
    );
    assert_eq!(
        ImageDecoder::parse_header(b"P5\n10 ten 255\n"),
        Err(DecodeError::InvalidHeader)
    );
    assert!(!ImageDecoder::validate_format(b"hello world"));
}

#[test]
fn ascii_graymap_is_rescaled_to_eight_bits() {
    let bytes = b"P2\n2 2\n15\n0 15\n15 0\n";
    let header = ImageDecoder::parse_header(bytes).unwrap();
    assert_eq!(header.data_bytes, bytes.len() - header.header_bytes);

    let pixels = ImageDecoder::parse_rows(bytes, &header, 1, 1).unwrap();
    assert!(!pixels.is_zero_copy());
    assert_eq!(pixels.start_offset, 1);
    assert_eq!(pixels.height, 1);
    assert_eq!(pixels.max_value, 255);
    assert_eq!(pixels.bytes(), &[255, 0]);
}

#[test]
fn ascii_bitmap_is_packed_like_binary() {
    let bytes = b"P1\n# c\n3 2\n1 0 1\n011\n";
    let (header, pixels) = ImageDecoder::parse_complete_image(bytes).unwrap();

    assert_eq!(header.format, ImageFormat::P1);
    assert_eq!(pixels.stride, 1);
    assert_eq!(pixels.bytes(), &[0b1010_0000, 0b0110_0000]);
}

#[test]
fn ascii_pixmap_keeps_channel_order() {
    let bytes = b"P3\n1 1\n255\n10 20 30\n";
    let (_, pixels) = ImageDecoder::parse_complete_image(bytes).unwrap();
    assert_eq!(pixels.mode, ColorMode::Rgb);
    assert_eq!(pixels.bytes_per_pixel, 3);
    assert_eq!(pixels.bytes(), &[10, 20, 30]);
}

#[test]
fn bad_or_missing_ascii_samples_fail() {
    let short = b"P2\n3 3\n255\n1 2 3\n";
    let header = ImageDecoder::parse_header(short).unwrap();
    assert_eq!(
        ImageDecoder::parse_rows(short, &header, 0, 2),
        Err(DecodeError::Truncated)
    );

    let garbage = b"P2\n2 1\n255\n1 x\n";
    let header = ImageDecoder::parse_header(garbage).unwrap();
    assert_eq!(
        ImageDecoder::parse_rows(garbage, &header, 0, 1),
        Err(DecodeError::InvalidSample)
    );
}

#[test]
fn truncated_binary_rows_fail_and_counts_clamp() {
    let bytes = with_payload(b"P4\n10 4\n", &[0xFF, 0xC0, 0x00]);
    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(header.data_bytes, 8);

    assert!(ImageDecoder::parse_rows(&bytes, &header, 0, 1).is_ok());
    assert_eq!(
        ImageDecoder::parse_rows(&bytes, &header, 0, 2),
        Err(DecodeError::Truncated)
    );
    assert_eq!(
        ImageDecoder::parse_rows(&bytes, &header, 4, 1),
        Err(DecodeError::RowOutOfRange)
    );

    let full = with_payload(b"P4\n10 4\n", &[0u8; 8]);
    let header = ImageDecoder::parse_header(&full).unwrap();
    let pixels = ImageDecoder::parse_rows(&full, &header, 3, 10).unwrap();
    assert_eq!(pixels.height, 1);
}

#[test]
fn sixteen_bit_graymap_uses_two_bytes_per_pixel() {
    let bytes = with_payload(b"P5\n2 1\n1000\n", &[0x03, 0xE8, 0x00, 0x00]);
    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(header.bytes_per_pixel(), 2);
    assert_eq!(header.data_bytes, 4);

    let pixels = ImageDecoder::parse_rows(&bytes, &header, 0, 1).unwrap();
    assert_eq!(pixels.stride, 4);
    assert_eq!(pixels.max_value, 1000);
}

#[test]
fn memory_helpers_match_panel_geometry() {
    assert_eq!(bytes_per_row(800, ColorMode::Mono), 100);
    assert_eq!(bytes_per_row(800, ColorMode::Rgb), 2400);
    assert_eq!(bytes_per_row(800, ColorMode::FourColor), 200);
    assert_eq!(bytes_per_row(801, ColorMode::Mono), 101);

    assert_eq!(max_rows_for_memory(800, ColorMode::Mono, 700), 7);
    assert_eq!(max_rows_for_memory(800, ColorMode::Mono, 10), 1);
    assert_eq!(max_rows_for_memory(800, ColorMode::Mono, 1_000_000), 128);

    assert_eq!(total_bytes(800, 480, ColorMode::Grayscale), 384_000);
    assert_eq!(allocation_plan(800, 480, ColorMode::Mono, 1_000), Some((10, 48)));
    assert_eq!(allocation_plan(800, 480, ColorMode::Rgb, 1_000), None);
}

#[test]
fn format_helpers_describe_headers() {
    let bytes = with_payload(b"P4\n16 2\n", &[0; 4]);
    assert_eq!(ImageDecoder::format_info(&bytes), Some((ImageFormat::P4, true)));
    assert_eq!(ImageDecoder::format_info(b"P2 1 1 1 0"), Some((ImageFormat::P2, false)));
    assert_eq!(ImageDecoder::format_info(b"JPEG"), None);

    let header = ImageDecoder::parse_header(&bytes).unwrap();
    assert_eq!(
        ImageDecoder::describe(&header),
        "PBM binary 16x2 (mono, max 1, 4 data bytes)"
    );

    let pixels = ImageDecoder::parse_rows(&bytes, &header, 0, 0).unwrap();
    assert!(validate_pixel_range(&pixels, 15, 1));
    assert!(!validate_pixel_range(&pixels, 16, 0));
}
