//! `ls`: plain, long (`-l`) and human-readable (`-lh`) listings.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tether_core::{
    to_bytes, Command, CommandParser, ConnectionObserver, LineContext, ObserverError, ParseChain, Parsed, Result,
};

fn files_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S{2,}").expect("Invalid files list regex"))
}

fn total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"total\s+(\d+\S*)").expect("Invalid total regex"))
}

fn long_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\w-]{10})\s+(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S.*\S)\s+(\S+)\s*$")
            .expect("Invalid long listing regex")
    })
}

fn long_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\w-]{10})\s+(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S.*\S)\s+(\S+)\s+->\s+(\S+)\s*$")
            .expect("Invalid long link regex")
    })
}

/// Type of a listed entry, taken from the first permission character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// `d`
    Directory,
    /// `l`
    Link,
    /// `-`
    File,
    /// Anything else (`c`, `b`, `p`, `s`).
    Other,
}

impl FileKind {
    fn from_permissions(permissions: &str) -> Self {
        match permissions.chars().next() {
            Some('d') => FileKind::Directory,
            Some('l') => FileKind::Link,
            Some('-') => FileKind::File,
            _ => FileKind::Other,
        }
    }
}

/// One listed entry. Plain listings only fill `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_links_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_raw: Option<String>,
    /// `None` when the size column is not a size (device numbers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Link target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl FileEntry {
    /// Entry of a plain listing.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The entry type, known only for long listings.
    pub fn kind(&self) -> Option<FileKind> {
        self.permissions
            .as_deref()
            .map(FileKind::from_permissions)
    }
}

/// The `total` line of a long listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Total {
    pub raw: String,
    pub bytes: u64,
}

/// Parsed `ls` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<Total>,
    pub files: BTreeMap<String, FileEntry>,
}

impl LsResult {
    /// Entries of the given kind.
    pub fn of_kind(&self, kind: FileKind) -> BTreeMap<String, FileEntry> {
        self.files
            .iter()
            .filter(|(_, entry)| entry.kind() == Some(kind))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }
}

/// Parser for `ls [options]`.
#[derive(Debug, Clone, Default)]
pub struct Ls {
    options: Option<String>,
    ret: LsResult,
}

impl Ls {
    /// `ls` without options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options passed to `ls` (`-l`, `-lh`, ...).
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        let options = options.into();
        self.options = (!options.trim().is_empty()).then_some(options);
        self
    }

    fn parse_total(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !ctx.search(total_re(), line) {
            return Ok(Parsed::NotConsumed);
        }
        let raw = ctx.group(1).to_string();
        let bytes = to_bytes(&raw)?;
        self.ret.total = Some(Total { raw, bytes });
        Ok(Parsed::Consumed)
    }

    fn parse_long_link(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !ctx.search(long_link_re(), line) {
            return Ok(Parsed::NotConsumed);
        }
        self.add_long_entry(ctx, true)?;
        Ok(Parsed::Consumed)
    }

    fn parse_long_file(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !ctx.search(long_re(), line) {
            return Ok(Parsed::NotConsumed);
        }
        self.add_long_entry(ctx, false)?;
        Ok(Parsed::Consumed)
    }

    fn parse_files_list(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !ctx.search(files_list_re(), line) {
            return Ok(Parsed::NotConsumed);
        }
        for name in line.split_whitespace() {
            self.ret.files.insert(name.to_string(), FileEntry::named(name));
        }
        Ok(Parsed::Consumed)
    }

    fn add_long_entry(&mut self, ctx: &LineContext<'_>, is_link: bool) -> Result<()> {
        let hard_links_count = ctx
            .group(2)
            .parse()
            .map_err(|_| ObserverError::CommandFailure {
                command: ctx.command_string().to_string(),
                reason: format!("invalid hard link count '{}'", ctx.group(2)),
            })?;
        let size_raw = ctx.group(5).to_string();
        let entry = FileEntry {
            name: ctx.group(7).to_string(),
            permissions: Some(ctx.group(1).to_string()),
            hard_links_count: Some(hard_links_count),
            owner: Some(ctx.group(3).to_string()),
            group: Some(ctx.group(4).to_string()),
            size_bytes: to_bytes(&size_raw).ok(),
            size_raw: Some(size_raw),
            date: Some(ctx.group(6).to_string()),
            link: is_link.then(|| ctx.group(8).to_string()),
        };
        self.ret.files.insert(entry.name.clone(), entry);
        Ok(())
    }
}

impl CommandParser for Ls {
    type Output = LsResult;

    fn command_string(&self) -> String {
        match &self.options {
            Some(options) => format!("ls {}", options),
            None => "ls".to_string(),
        }
    }

    // Links before plain long entries: the long pattern also matches "name -> target".
    fn parse_chain(&self) -> ParseChain<Self> {
        ParseChain::new()
            .handler("total", Ls::parse_total)
            .handler("long_link", Ls::parse_long_link)
            .handler("long_file", Ls::parse_long_file)
            .handler("files_list", Ls::parse_files_list)
    }

    fn result(&self) -> LsResult {
        self.ret.clone()
    }
}

/// Type filters on a finished `ls` command.
///
/// Each returns the observer's error (`ResultNotAvailableYet` while pending).
pub trait LsCommand {
    /// Directories only.
    fn get_dirs(&self) -> Result<BTreeMap<String, FileEntry>>;
    /// Symbolic links only.
    fn get_links(&self) -> Result<BTreeMap<String, FileEntry>>;
    /// Regular files only.
    fn get_files(&self) -> Result<BTreeMap<String, FileEntry>>;
}

impl LsCommand for Command<Ls> {
    fn get_dirs(&self) -> Result<BTreeMap<String, FileEntry>> {
        Ok(self.result()?.of_kind(FileKind::Directory))
    }

    fn get_links(&self) -> Result<BTreeMap<String, FileEntry>> {
        Ok(self.result()?.of_kind(FileKind::Link))
    }

    fn get_files(&self) -> Result<BTreeMap<String, FileEntry>> {
        Ok(self.result()?.of_kind(FileKind::File))
    }
}
