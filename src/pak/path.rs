#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use crate::pak::error::{PakError, PakResult};

/// Maps a file under `input_root` to its resource name: the relative path
/// with `/` as the only separator and no empty segments, so `a\\b`, `a\b`
/// and `a/b` all name the same resource. Names that are not UTF-8 are
/// rejected because they could not be mapped back exactly.
pub fn normalize_rel_path(input_root: &Path, file_path: &Path) -> PakResult<String> {
    let rel = file_path
        .strip_prefix(input_root)
        .map_err(|_| PakError::Outside(file_path.display().to_string()))?;

    let mut out = String::new();
    for (i, comp) in rel.components().enumerate() {
        if i != 0 {
            out.push('/');
        }
        let part = comp
            .as_os_str()
            .to_str()
            .ok_or_else(|| PakError::NonUtf8Path(file_path.display().to_string()))?;
        out.push_str(part);
    }

    let out = out
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if out.is_empty() {
        return Err(PakError::Invalid("empty relative path".into()));
    }

    Ok(out)
}

/// Reverses a resource name into a path below `root` for extraction.
/// Absolute names and `..` segments are refused.
pub fn resolve_under(root: &Path, name: &str) -> PakResult<PathBuf> {
    let mut out = root.to_path_buf();
    for part in name.split('/') {
        if part.is_empty() {
            continue;
        }
        let mut comps = Path::new(part).components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(c)), None) => out.push(c),
            _ => return Err(PakError::Invalid(format!("unsafe resource path: {name}"))),
        }
    }
    if out == root {
        return Err(PakError::Invalid(format!("empty resource path: {name:?}")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nested_paths_use_forward_slashes() {
        let root = Path::new("root");
        let file = root.join("sub").join("b.txt");
        assert_eq!(normalize_rel_path(root, &file).unwrap(), "sub/b.txt");
    }

    #[test]
    fn files_outside_root_are_rejected() {
        let err = normalize_rel_path(Path::new("root"), Path::new("other/a.txt")).unwrap_err();
        assert!(matches!(err, PakError::Outside(_)));
    }

    #[test]
    fn root_itself_has_no_name() {
        let err = normalize_rel_path(Path::new("root"), Path::new("root")).unwrap_err();
        assert!(matches!(err, PakError::Invalid(_)));
    }

    #[cfg(unix)]
    #[test]
    fn backslash_in_file_name_collapses_to_separator() {
        let root = Path::new("root");
        let file = root.join("sub\\b.txt");
        assert_eq!(normalize_rel_path(root, &file).unwrap(), "sub/b.txt");
    }

    #[cfg(unix)]
    #[test]
    fn repeated_and_trailing_separators_collapse() {
        let root = Path::new("root");
        assert_eq!(normalize_rel_path(root, &root.join("a\\\\b")).unwrap(), "a/b");
        assert_eq!(normalize_rel_path(root, &root.join("a\\")).unwrap(), "a");
        assert_eq!(normalize_rel_path(root, &root.join("\\a")).unwrap(), "a");
    }

    #[test]
    fn resolve_refuses_escaping_names() {
        let out = Path::new("out");
        assert!(resolve_under(out, "../evil").is_err());
        assert!(resolve_under(out, "a/../../evil").is_err());
        assert!(resolve_under(out, "").is_err());
        assert_eq!(resolve_under(out, "sub/b.txt").unwrap(), out.join("sub").join("b.txt"));
    }

    proptest! {
        #[test]
        fn normalized_names_resolve_back(parts in prop::collection::vec("[a-zA-Z0-9_. -]{1,12}", 1..5)) {
            prop_assume!(parts.iter().all(|p| p != "." && p != ".." && p.trim() == p.as_str()));
            let root = Path::new("root");
            let mut file = root.to_path_buf();
            for p in &parts {
                file.push(p);
            }
            let name = normalize_rel_path(root, &file).unwrap();
            prop_assert_eq!(&name, &parts.join("/"));
            prop_assert_eq!(resolve_under(root, &name).unwrap(), file);
        }
    }
}
