//! Property-based tests using proptest.
//!
//! These tests check path canonicalization and the in-place mutation
//! invariants on randomly generated inputs.

use proptest::prelude::*;
use std::fs;
use std::io::Cursor;

use tar_overlay::mutate::{add_entry, append_to_file, remove_entry};
use tar_overlay::scan::{copy_entry_content, entries, find_header, seek_end};
use tar_overlay::shift::{Direction, shift_tail};
use tar_overlay::ResolveContext;
use tar_overlay::tar::{BLOCK_SIZE, TarHeader, is_empty_block, padded};

const TREE_DEPTH: usize = 5;

/// Creates `a/` and `b/` at every level below the root, `TREE_DEPTH` deep.
fn make_tree(root: &std::path::Path, depth: usize) {
    if depth == 0 {
        return;
    }
    for name in ["a", "b"] {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        make_tree(&dir, depth - 1);
    }
}

/// Relative paths made of `a`, `b`, `.`, `..` and empty segments that never
/// climb above the root nor below the tree.
fn relative_path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(prop_oneof![Just("a"), Just("b"), Just("."), Just(".."), Just("")], 1..10)
        .prop_filter("must stay inside the tree", |segments| {
            if segments.last() == Some(&"") {
                return false;
            }
            let mut depth = 0usize;
            for &s in segments {
                match s {
                    ".." if depth == 0 => return false,
                    ".." => depth -= 1,
                    "a" | "b" => depth += 1,
                    _ => {}
                }
                if depth > TREE_DEPTH {
                    return false;
                }
            }
            true
        })
        .prop_map(|segments| format!("./{}", segments.join("/")))
}

/// Lexical reference: the segments left after applying `.` and `..`.
fn expected(root: &str, rel: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for s in rel.split('/') {
        match s {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }
    if stack.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, stack.join("/"))
    }
}

fn build_archive(sizes: &[usize]) -> Cursor<Vec<u8>> {
    let mut archive = Cursor::new(vec![0u8; 2 * BLOCK_SIZE]);
    for (i, &size) in sizes.iter().enumerate() {
        let content = vec![i as u8 + 1; size];
        let header = TarHeader::new(format!("f{}", i), 0o644, size as u64);
        add_entry(&mut archive, &header, &mut &content[..]).unwrap();
    }
    archive
}

fn read_entry(archive: &mut Cursor<Vec<u8>>, name: &str) -> Vec<u8> {
    let (header, _) = find_header(archive, name).unwrap();
    let mut out = Vec::new();
    copy_entry_content(archive, &header, &mut out).unwrap();
    out
}

fn assert_terminated(archive: &mut Cursor<Vec<u8>>) {
    let end = seek_end(archive).unwrap() as usize;
    let data = archive.get_ref();
    assert!(data.len() >= end + 2 * BLOCK_SIZE);
    assert!(is_empty_block(&data[end..]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Resolution drops `.`, `..` and empty segments, and is idempotent.
    #[test]
    fn resolve_is_canonical_and_idempotent(rel in relative_path_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path(), TREE_DEPTH);
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ResolveContext::new(root.clone());

        let resolved = ctx.resolve(&rel).unwrap();
        let s = resolved.as_str();
        prop_assert_eq!(s, expected(&root, &rel));
        prop_assert!(!s.contains("//"));
        prop_assert!(!s.contains("/./") && !s.ends_with("/."));
        prop_assert!(!s.contains("/../") && !s.ends_with("/.."));
        prop_assert!(!resolved.is_archive_path());

        let again = ctx.resolve(s).unwrap();
        prop_assert_eq!(again, resolved);
    }

    /// Appending grows exactly one entry and leaves the others intact.
    #[test]
    fn append_only_changes_target(
        sizes in proptest::collection::vec(0usize..1500, 1..6),
        pick in any::<prop::sample::Index>(),
        extra in 0usize..1500,
    ) {
        let target = pick.index(sizes.len());
        let mut archive = build_archive(&sizes);
        let len_before = archive.get_ref().len() as u64;
        let name = format!("f{}", target);

        let new_size = append_to_file(&mut archive, &name, &mut Cursor::new(vec![0xAB; extra])).unwrap();
        prop_assert_eq!(new_size, (sizes[target] + extra) as u64);

        let grown = padded(new_size) - padded(sizes[target] as u64);
        prop_assert_eq!(archive.get_ref().len() as u64, len_before + grown);

        for (i, &size) in sizes.iter().enumerate() {
            let content = read_entry(&mut archive, &format!("f{}", i));
            if i == target {
                prop_assert_eq!(&content[..size], &vec![i as u8 + 1; size][..]);
                prop_assert_eq!(&content[size..], &vec![0xAB; extra][..]);
            } else {
                prop_assert_eq!(content, vec![i as u8 + 1; size]);
            }
        }
        assert_terminated(&mut archive);
    }

    /// Removing an entry closes its gap and keeps everything else readable.
    #[test]
    fn remove_closes_gap(
        sizes in proptest::collection::vec(0usize..1500, 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let target = pick.index(sizes.len());
        let mut archive = build_archive(&sizes);
        let len_before = archive.get_ref().len() as u64;
        let name = format!("f{}", target);

        prop_assert_eq!(remove_entry(&mut archive, &name, false).unwrap(), vec![name.clone()]);
        let freed = BLOCK_SIZE as u64 + padded(sizes[target] as u64);
        prop_assert_eq!(archive.get_ref().len() as u64, len_before - freed);

        let names: Vec<String> = entries(&mut archive)
            .unwrap()
            .map(|r| r.unwrap().0.name)
            .collect();
        prop_assert!(!names.contains(&name));
        prop_assert_eq!(names.len(), sizes.len() - 1);
        for (i, &size) in sizes.iter().enumerate().filter(|&(i, _)| i != target) {
            prop_assert_eq!(read_entry(&mut archive, &format!("f{}", i)), vec![i as u8 + 1; size]);
        }
        assert_terminated(&mut archive);
    }

    /// A tail shift matches moving the same bytes within a plain vector.
    #[test]
    fn shift_tail_matches_model(
        len in 1usize..150_000,
        start_frac in 0.0f64..1.0,
        delta in 0u64..70_000,
        forward in any::<bool>(),
    ) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let start = ((len as f64) * start_frac) as u64;
        let end = len as u64;
        let direction = if forward { Direction::Forward } else { Direction::Backward };
        prop_assume!(forward || delta <= start);

        let mut cur = Cursor::new(data.clone());
        let new_end = shift_tail(&mut cur, start, end, direction, delta).unwrap();
        let out = cur.into_inner();

        let tail = &data[start as usize..];
        let to = (if forward { start + delta } else { start - delta }) as usize;
        prop_assert_eq!(new_end as usize, to + tail.len());
        prop_assert_eq!(&out[to..to + tail.len()], tail);
        let head = start.min(to as u64) as usize;
        prop_assert_eq!(&out[..head], &data[..head]);
    }
}
