//! Path resolution for release files
//!
//! Maps a file (by extension and naming heuristics) to its canonical location in
//! the deployable `addons/sourcemod/...` tree. The mapping is a single ordered
//! rule table — adding a new file kind is a table edit, not new code. Rules are
//! matched first-to-last because some patterns overlap: a `.txt` file containing
//! "phrases" must hit the translations rule before the generic loose-`.txt` rule.
//!
//! Resolution is a pure function: no I/O, no hidden state. Files no rule matches
//! resolve to [`Route::Unrouted`], which callers treat as a warning, never an error.

use crate::types::ArtifactKind;
use std::path::{Component, Path, PathBuf};

/// Plugins directory inside the deployment tree
pub const PLUGINS_DIR: &str = "addons/sourcemod/plugins";
/// Disabled plugins directory
pub const DISABLED_PLUGINS_DIR: &str = "addons/sourcemod/plugins/disabled";
/// Scripting sources directory
pub const SCRIPTING_DIR: &str = "addons/sourcemod/scripting";
/// Include files directory
pub const INCLUDE_DIR: &str = "addons/sourcemod/scripting/include";
/// Translations directory
pub const TRANSLATIONS_DIR: &str = "addons/sourcemod/translations";

/// Outcome of resolving one file
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// File belongs at this path, relative to the release's `files/` root
    Placed(PathBuf),
    /// No rule matched; the file is left in place and reported as a warning
    Unrouted,
}

/// How a rule decides whether it applies to a file
#[derive(Clone, Copy, Debug)]
enum Matcher {
    /// File extension equals (case-insensitive)
    Ext(&'static str),
    /// File extension equals AND some path segment is "disabled"
    ExtInDisabledSegment(&'static str),
    /// File name contains the substring (case-insensitive)
    NameContains(&'static str),
}

/// One routing rule: matcher plus destination directory
/// (empty string = loose at the `files/` root)
struct Rule {
    matcher: Matcher,
    dest_dir: &'static str,
}

/// The routing table. Order matters; first match wins.
static RULES: &[Rule] = &[
    Rule {
        matcher: Matcher::ExtInDisabledSegment("smx"),
        dest_dir: DISABLED_PLUGINS_DIR,
    },
    Rule {
        matcher: Matcher::Ext("smx"),
        dest_dir: PLUGINS_DIR,
    },
    Rule {
        matcher: Matcher::Ext("sp"),
        dest_dir: SCRIPTING_DIR,
    },
    Rule {
        matcher: Matcher::Ext("inc"),
        dest_dir: INCLUDE_DIR,
    },
    Rule {
        matcher: Matcher::NameContains("phrases"),
        dest_dir: TRANSLATIONS_DIR,
    },
    Rule {
        matcher: Matcher::Ext("txt"),
        dest_dir: "",
    },
    Rule {
        matcher: Matcher::Ext("cfg"),
        dest_dir: "",
    },
    Rule {
        matcher: Matcher::Ext("bsp"),
        dest_dir: "maps",
    },
    Rule {
        matcher: Matcher::Ext("wav"),
        dest_dir: "sound",
    },
    Rule {
        matcher: Matcher::Ext("mp3"),
        dest_dir: "sound",
    },
    Rule {
        matcher: Matcher::Ext("mdl"),
        dest_dir: "models",
    },
    Rule {
        matcher: Matcher::Ext("vmt"),
        dest_dir: "materials",
    },
];

/// Resolve a file to its destination within the `files/` tree.
///
/// `path` is the file's current relative path (e.g. an extracted archive member);
/// directory segments only participate in the "disabled" check, the destination
/// is always keyed on the file name alone.
pub fn resolve(path: &Path) -> Route {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Route::Unrouted;
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let name_lower = file_name.to_ascii_lowercase();

    for rule in RULES {
        let matched = match rule.matcher {
            Matcher::Ext(e) => ext == e,
            Matcher::ExtInDisabledSegment(e) => ext == e && has_disabled_segment(path),
            Matcher::NameContains(s) => name_lower.contains(s),
        };
        if matched {
            let dest = if rule.dest_dir.is_empty() {
                PathBuf::from(file_name)
            } else {
                Path::new(rule.dest_dir).join(file_name)
            };
            return Route::Placed(dest);
        }
    }

    Route::Unrouted
}

/// Destination for a directly-downloaded artifact, relative to the release root.
///
/// Direct downloads are placed by their declared kind rather than by extension:
/// the upstream page already tags each link with a role, and zip attachments
/// must land in `archives/` (outside `files/`) where the extract stage finds them.
pub fn kind_destination(kind: ArtifactKind, file_name: &str) -> PathBuf {
    match kind {
        ArtifactKind::CompiledBinary => Path::new("files").join(PLUGINS_DIR).join(file_name),
        ArtifactKind::SourceScript => Path::new("files").join(SCRIPTING_DIR).join(file_name),
        ArtifactKind::Config => Path::new("files").join(file_name),
        ArtifactKind::Archive => Path::new("archives").join(file_name),
    }
}

/// Whether any directory segment of the path is named "disabled"
fn has_disabled_segment(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    parent.components().any(|c| match c {
        Component::Normal(seg) => seg.to_str().is_some_and(|s| s.eq_ignore_ascii_case("disabled")),
        _ => false,
    })
}
