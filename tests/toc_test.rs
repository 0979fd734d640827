//! Footer/TOC parsing, listing, and selective extraction.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use ocibundle::archive::seekable::{parse_footer, FOOTER_SIZE};
use ocibundle::archive::select::extract_selected;
use ocibundle::archive::toc::{list_entries, read_toc};
use ocibundle::archive::writer::write_archive;
use ocibundle::{
    CancelToken, Error, ExtractOptions, SecurityError, SeekerReader, TocBytesReader,
};
use tempfile::tempdir;

fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn archive_to_vec(source: &Path) -> Vec<u8> {
    let mut blob = Vec::new();
    write_archive(&CancelToken::new(), source, &mut blob, None).unwrap();
    blob
}

fn reader_for(blob: &[u8]) -> SeekerReader<Cursor<Vec<u8>>> {
    SeekerReader::new(Cursor::new(blob.to_vec()), blob.len() as u64)
}

/// The six-file tree used by the selective-extraction tests.
fn selective_source() -> tempfile::TempDir {
    let source = tempdir().unwrap();
    write_file(source.path(), "config.json", b"{\"app\":\"test\"}");
    write_file(source.path(), "readme.txt", b"README content");
    write_file(source.path(), "data/file1.json", b"{\"data\":1}");
    write_file(source.path(), "data/file2.txt", b"Data 2");
    write_file(source.path(), "data/sub/file3.json", b"{\"data\":3}");
    write_file(source.path(), "src/main.go", b"package main");
    source
}

// ============================================================================
// TOC parsing and listing
// ============================================================================

#[test]
fn listing_matches_archived_tree() {
    let source = tempdir().unwrap();
    let mut expected_total = 0u64;
    for i in 0..20 {
        let contents = format!("File {} with some content repeated {}", i, "x".repeat(i));
        expected_total += contents.len() as u64;
        write_file(source.path(), &format!("file{}.txt", i), contents.as_bytes());
    }

    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);
    let toc = read_toc(&reader, blob.len() as u64).unwrap();

    let result = list_entries(&toc, &[]);
    assert_eq!(result.file_count, 20);
    assert_eq!(result.dir_count, 0);
    assert_eq!(result.total_size, expected_total);
    assert_eq!(result.files.len(), 20);

    // TOC order mirrors tar order: sorted walk
    let names: Vec<&str> = result.files.iter().map(|f| f.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn toc_offsets_are_usable_and_increasing() {
    let source = tempdir().unwrap();
    write_file(source.path(), "a.txt", b"aaa");
    write_file(source.path(), "b.txt", b"bbb");

    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);
    let toc = read_toc(&reader, blob.len() as u64).unwrap();

    let offsets: Vec<u64> = toc.entries.iter().map(|e| e.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    // The landmark member sits before the first content member
    assert!(offsets[0] > 0);
    assert!(*offsets.last().unwrap() < blob.len() as u64);
}

#[test]
fn listing_filters_through_patterns() {
    let source = selective_source();
    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);
    let toc = read_toc(&reader, blob.len() as u64).unwrap();

    let result = list_entries(&toc, &["**/*.json".to_string()]);
    let names: Vec<&str> = result.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["config.json", "data/file1.json", "data/sub/file3.json"]
    );
    assert_eq!(result.file_count, 3);
}

#[test]
fn listing_reports_symlinks_and_dirs() {
    let source = tempdir().unwrap();
    write_file(source.path(), "real/file.txt", b"data");
    #[cfg(unix)]
    std::os::unix::fs::symlink("real/file.txt", source.path().join("alias")).unwrap();

    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);
    let toc = read_toc(&reader, blob.len() as u64).unwrap();
    let result = list_entries(&toc, &[]);

    assert_eq!(result.dir_count, 1);
    let dir = result.files.iter().find(|f| f.name == "real").unwrap();
    assert!(dir.is_dir);
    assert_eq!(dir.type_tag, "dir");

    #[cfg(unix)]
    {
        let link = result.files.iter().find(|f| f.name == "alias").unwrap();
        assert_eq!(link.type_tag, "symlink");
        assert_eq!(link.link_target, "real/file.txt");
    }
}

#[test]
fn toc_bytes_reader_feeds_the_parser() {
    let source = tempdir().unwrap();
    write_file(source.path(), "a.txt", b"alpha");
    write_file(source.path(), "b.txt", b"beta");

    let blob = archive_to_vec(source.path());
    let size = blob.len() as u64;

    // Simulate the metadata-only fetch: tail window + TOC window
    let tail_len = size.min(100);
    let tail = blob[(size - tail_len) as usize..].to_vec();
    let (toc_offset, footer_len) = parse_footer(&tail).unwrap();
    let toc_bytes = blob[toc_offset as usize..(size - footer_len as u64) as usize].to_vec();

    let reader = TocBytesReader::new(size, tail, size - tail_len, toc_bytes, toc_offset);
    let toc = read_toc(&reader, size).unwrap();
    let result = list_entries(&toc, &[]);
    assert_eq!(result.file_count, 2);
    assert_eq!(result.total_size, 9);
}

#[test]
fn read_toc_rejects_truncated_and_garbage_blobs() {
    let reader = reader_for(&[0u8; 10]);
    assert!(matches!(
        read_toc(&reader, 10),
        Err(Error::Format { .. })
    ));

    let garbage = vec![0x5au8; 4096];
    let reader = reader_for(&garbage);
    assert!(matches!(
        read_toc(&reader, 4096),
        Err(Error::Format { .. })
    ));

    // Valid archive with the footer chopped off
    let source = tempdir().unwrap();
    write_file(source.path(), "a.txt", b"alpha");
    let blob = archive_to_vec(source.path());
    let truncated = &blob[..blob.len() - FOOTER_SIZE];
    let reader = reader_for(truncated);
    assert!(read_toc(&reader, truncated.len() as u64).is_err());
}

// ============================================================================
// Selective extraction
// ============================================================================

#[test]
fn selective_extraction_writes_exactly_the_matches() {
    let source = selective_source();
    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);

    let dest = tempdir().unwrap();
    let patterns = vec!["**/*.json".to_string()];
    let report = extract_selected(
        &CancelToken::new(),
        &reader,
        blob.len() as u64,
        dest.path(),
        &patterns,
        &ExtractOptions::default(),
    )
    .unwrap();

    assert_eq!(report.files_extracted, 3);
    assert_eq!(
        fs::read(dest.path().join("config.json")).unwrap(),
        b"{\"app\":\"test\"}"
    );
    assert_eq!(
        fs::read(dest.path().join("data/file1.json")).unwrap(),
        b"{\"data\":1}"
    );
    assert_eq!(
        fs::read(dest.path().join("data/sub/file3.json")).unwrap(),
        b"{\"data\":3}"
    );

    assert!(!dest.path().join("readme.txt").exists());
    assert!(!dest.path().join("data/file2.txt").exists());
    assert!(!dest.path().join("src/main.go").exists());
}

#[test]
fn selective_extraction_with_empty_patterns_extracts_all() {
    let source = selective_source();
    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);

    let dest = tempdir().unwrap();
    let report = extract_selected(
        &CancelToken::new(),
        &reader,
        blob.len() as u64,
        dest.path(),
        &[],
        &ExtractOptions::default(),
    )
    .unwrap();

    assert_eq!(report.files_extracted, 6);
    assert_eq!(
        fs::read(dest.path().join("src/main.go")).unwrap(),
        b"package main"
    );
}

#[test]
fn selective_extraction_enforces_bounds() {
    let source = selective_source();
    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);

    let dest = tempdir().unwrap();
    let options = ExtractOptions::new().max_files(2);
    let err = extract_selected(
        &CancelToken::new(),
        &reader,
        blob.len() as u64,
        dest.path(),
        &[],
        &options,
    )
    .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Security(SecurityError::FileCountExceeded { .. })
    ));
}

#[test]
fn selective_extraction_honors_cancellation() {
    let source = selective_source();
    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);

    let token = CancelToken::new();
    token.cancel();

    let dest = tempdir().unwrap();
    let err = extract_selected(
        &token,
        &reader,
        blob.len() as u64,
        dest.path(),
        &[],
        &ExtractOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_cancellation());
}

#[cfg(unix)]
#[test]
fn selective_extraction_recreates_symlinks() {
    let source = tempdir().unwrap();
    write_file(source.path(), "real.txt", b"content");
    std::os::unix::fs::symlink("real.txt", source.path().join("alias")).unwrap();

    let blob = archive_to_vec(source.path());
    let reader = reader_for(&blob);

    let dest = tempdir().unwrap();
    extract_selected(
        &CancelToken::new(),
        &reader,
        blob.len() as u64,
        dest.path(),
        &[],
        &ExtractOptions::default(),
    )
    .unwrap();

    let alias = dest.path().join("alias");
    assert!(fs::symlink_metadata(&alias).unwrap().file_type().is_symlink());
    assert_eq!(fs::read(&alias).unwrap(), b"content");
}
