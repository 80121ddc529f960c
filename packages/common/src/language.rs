use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages a patch may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Java,
    Invalid,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Java => "java",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Self::C),
            "java" => Ok(Self::Java),
            other => Err(format!("unsupported language '{other}'")),
        }
    }
}

/// Content-and-filename based language detection. Returns a display name
/// such as `"C"`, `"C++"` or `"Java"`, or `None` when nothing matches.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, filename: &str, content: &[u8]) -> Option<String>;
}

/// Small heuristic detector covering the languages challenges ship in.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicDetector;

const CPP_EXTENSIONS: &[&str] = &["cc", "cpp", "cxx", "hh", "hpp", "hxx", "inl"];

/// Documentation, data and other-language files. Never source, whatever
/// they contain.
const NON_SOURCE_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "rst", "adoc", "json", "yaml", "yml", "toml", "xml", "html", "htm",
    "css", "csv", "ini", "cfg", "conf", "py", "sh", "bash", "rb", "pl", "js", "ts", "go", "rs",
    "kt", "scala", "patch", "diff", "in", "am", "cmake", "mk",
];

/// Lowercased extension of the last path component, if it has one.
fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

impl LanguageDetector for HeuristicDetector {
    fn detect(&self, filename: &str, content: &[u8]) -> Option<String> {
        // Content only decides for extensionless files.
        if let Some(ext) = extension(filename) {
            return CPP_EXTENSIONS
                .contains(&ext.as_str())
                .then(|| "C++".to_string());
        }
        if content.contains(&0) {
            return None;
        }

        let text = String::from_utf8_lossy(&content[..content.len().min(16 * 1024)]);
        let lines = || text.lines().map(str::trim_start);

        let java_hits = lines()
            .filter(|l| {
                l.starts_with("package ")
                    || (l.starts_with("import ") && l.ends_with(';') && !l.contains('"'))
                    || l.starts_with("public class ")
                    || l.starts_with("public final class ")
                    || l.starts_with("public interface ")
            })
            .count();
        let c_hits = lines()
            .filter(|l| {
                l.starts_with("#include")
                    || l.starts_with("#define")
                    || l.starts_with("#ifndef")
                    || l.starts_with("#endif")
                    || l.starts_with("typedef ")
                    || l.starts_with("static ")
                    || l.starts_with("struct ")
            })
            .count();
        let cpp_hits = lines()
            .filter(|l| {
                l.starts_with("namespace ")
                    || l.starts_with("template<")
                    || l.starts_with("template <")
                    || l.contains("std::")
            })
            .count();

        if java_hits > 0 && java_hits >= c_hits {
            Some("Java".into())
        } else if cpp_hits > 0 && c_hits > 0 {
            Some("C++".into())
        } else if c_hits > 0 {
            Some("C".into())
        } else {
            None
        }
    }
}

/// Decides which language a file belongs to.
pub struct Identifier<D = HeuristicDetector> {
    detector: D,
}

impl Default for Identifier<HeuristicDetector> {
    fn default() -> Self {
        Self {
            detector: HeuristicDetector,
        }
    }
}

impl<D: LanguageDetector> Identifier<D> {
    pub fn with_detector(detector: D) -> Self {
        Self { detector }
    }

    pub fn identify(&self, filename: &str, content: &[u8]) -> Language {
        if [".c", ".h", ".c.in", ".h.in"]
            .iter()
            .any(|ext| filename.ends_with(ext))
        {
            return Language::C;
        }
        if filename.ends_with(".java") {
            return Language::Java;
        }
        if extension(filename).is_some_and(|ext| NON_SOURCE_EXTENSIONS.contains(&ext.as_str())) {
            return Language::Invalid;
        }
        match self.detector.detect(filename, content).as_deref() {
            Some("C") | Some("C++") => Language::C,
            Some("Java") => Language::Java,
            _ => Language::Invalid,
        }
    }
}
