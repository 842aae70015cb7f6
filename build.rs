use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source trees owned by this crate. Anything else under the package root is not ours.
const SOURCE_DIRS: [&str; 4] = ["recsys", "src", "tests", "benches"];

// One hygiene rule: a line regex plus the message shown when it matches.
struct Rule {
    pattern: &'static str,
    description: &'static str,
    advice: &'static str,
    skip: fn(&str) -> bool,
}

// Collects every matching line of one file for a single rule.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    skip: fn(&str) -> bool,
}

impl ViolationCollector {
    fn new(file_path: &Path, skip: fn(&str) -> bool) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            skip,
        }
    }

    fn check_and_get_error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.description,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if !(self.skip)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*")
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Underscore-prefixed names inside comments or string literals are not bindings.
fn underscore_false_positive(line: &str) -> bool {
    if is_comment(line) {
        return true;
    }
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn never(_: &str) -> bool {
    false
}

const RULES: [Rule; 4] = [
    Rule {
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        description: "underscore-prefixed variables",
        advice: "Underscore-prefixed variable names are not allowed. Use the variable or remove it.",
        skip: underscore_false_positive,
    },
    Rule {
        pattern: r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        description: "forbidden comment patterns",
        advice: "Comments narrating edits (FIX, NEW, CHANGED, UPDATED and similar) are not allowed.",
        skip: never,
    },
    Rule {
        pattern: r"(//|/\*).*\*\*",
        description: "'**' in regular comments",
        advice: "The '**' pattern is only allowed in doc comments.",
        skip: is_doc_comment,
    },
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        description: "#[allow(dead_code)] attributes",
        advice: "#[allow(dead_code)] is not allowed. Use the code or remove it.",
        skip: never,
    },
];

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: &Rule, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();
    for path in files {
        let mut collector = ViolationCollector::new(path, rule.skip);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message(rule) {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = rust_sources();
    for rule in &RULES {
        if let Err(e) = scan(rule, &files) {
            // eprintln! so the message shows up in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
