//! `scp`: interactive copy that answers host-key and password prompts.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tether_core::{CommandParser, LineContext, ObserverError, ParseChain, Parsed, Result};
use tracing::{debug, warn};

fn success_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<FILENAME>\S+)\s+.*\d+%.*").expect("Invalid scp success regex"))
}

fn failed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<FAILED>cannot access|Could not|no such|denied|not a regular file|Is a directory|No route to host|lost connection)",
        )
        .expect("Invalid scp failure regex")
    })
}

fn permission_denied_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Permission denied, please try again|Permission denied \(publickey,password\)")
            .expect("Invalid permission denied regex")
    })
}

fn password_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password:").expect("Invalid password regex"))
}

fn ldap_password_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ldap password:").expect("Invalid ldap password regex"))
}

fn continue_connecting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(yes/no\)|'yes'\sor\s'no'").expect("Invalid yes/no regex"))
}

fn host_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Add correct host key in (?P<PATH>\S+) to get rid of this message")
            .expect("Invalid host key regex")
    })
}

fn id_dsa_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)id_dsa:").expect("Invalid id_dsa regex"))
}

fn verification_failed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Host key verification failed\.").expect("Invalid verification regex"))
}

/// What to do with a stale known_hosts entry before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnownHostsPolicy {
    /// `rm -f <known_hosts file>`
    Remove,
    /// `ssh-keygen -R <dest>`
    #[default]
    Keygen,
}

/// Parsed `scp` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScpResult {
    /// Files reported by progress lines, in transfer order.
    pub file_names: Vec<String>,
}

/// Parser for `scp [options] source dest`.
///
/// Requires at least one transferred file: a prompt without any progress line
/// fails the command.
#[derive(Debug, Clone)]
pub struct Scp {
    source: String,
    dest: String,
    options: Option<String>,
    password: String,
    known_hosts: Option<KnownHostsPolicy>,
    sent_password: bool,
    sent_ldap_password: bool,
    sent_continue_connecting: bool,
    hosts_file: Option<String>,
    ret: ScpResult,
}

impl Scp {
    /// Copies `source` to `dest` with the default known_hosts policy.
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            options: None,
            password: String::new(),
            known_hosts: Some(KnownHostsPolicy::default()),
            sent_password: false,
            sent_ldap_password: false,
            sent_continue_connecting: false,
            hosts_file: None,
            ret: ScpResult::default(),
        }
    }

    /// Sets extra options (`-r`, `-P 2222`, ...).
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        let options = options.into();
        self.options = (!options.trim().is_empty()).then_some(options);
        self
    }

    /// Password sent on `password:` prompts.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// `None` turns a host key verification failure into a command failure.
    pub fn with_known_hosts_policy(mut self, policy: Option<KnownHostsPolicy>) -> Self {
        self.known_hosts = policy;
        self
    }

    fn failure(ctx: &LineContext<'_>, line: &str) -> ObserverError {
        ObserverError::CommandFailure {
            command: ctx.command_string().to_string(),
            reason: format!("command failed in line '{}'", line),
        }
    }

    fn parse_known_hosts(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if ctx.search(id_dsa_re(), line) {
            ctx.sendline("")?;
        } else if ctx.search(verification_failed_re(), line) {
            match (self.hosts_file.clone(), self.known_hosts) {
                (Some(file), Some(policy)) => self.recover_host_key(&file, policy, ctx)?,
                _ => return Err(Self::failure(ctx, line)),
            }
        }
        Ok(Parsed::NotConsumed)
    }

    fn recover_host_key(&mut self, file: &str, policy: KnownHostsPolicy, ctx: &mut LineContext<'_>) -> Result<()> {
        warn!(known_hosts = %file, ?policy, "host key verification failed, retrying");
        match policy {
            KnownHostsPolicy::Remove => ctx.sendline(&format!("\nrm -f {}", file))?,
            KnownHostsPolicy::Keygen => ctx.sendline(&format!("\nssh-keygen -R {}", self.dest))?,
        }
        self.sent_continue_connecting = false;
        self.sent_password = false;
        let command = ctx.command_string().to_string();
        ctx.sendline(&command)
    }

    fn parse_success(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !ctx.search(success_re(), line) {
            return Ok(Parsed::NotConsumed);
        }
        let name = ctx.named("FILENAME").to_string();
        debug!(file = %name, "file transferred");
        self.ret.file_names.push(name);
        Ok(Parsed::Consumed)
    }

    fn push_yes_if_needed(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !self.sent_continue_connecting && ctx.search(continue_connecting_re(), line) {
            ctx.sendline("yes")?;
            self.sent_continue_connecting = true;
        }
        Ok(Parsed::NotConsumed)
    }

    fn parse_sent_password(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if !self.sent_ldap_password && ctx.search(ldap_password_re(), line) {
            debug!("sending ldap password");
            ctx.sendline(&self.password)?;
            self.sent_ldap_password = true;
            return Ok(Parsed::Consumed);
        }
        if !self.sent_password && ctx.search(password_re(), line) {
            debug!("sending password");
            ctx.sendline(&self.password)?;
            self.sent_password = true;
            return Ok(Parsed::Consumed);
        }
        if (self.sent_password || self.sent_ldap_password) && ctx.search(permission_denied_re(), line) {
            self.sent_password = false;
            self.sent_ldap_password = false;
            return Ok(Parsed::Consumed);
        }
        Ok(Parsed::NotConsumed)
    }

    fn parse_failed(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if ctx.search(failed_re(), line) {
            return Err(Self::failure(ctx, line));
        }
        Ok(Parsed::NotConsumed)
    }

    fn parse_hosts_file(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        if self.known_hosts.is_some() && ctx.search(host_key_re(), line) {
            self.hosts_file = Some(ctx.named("PATH").to_string());
        }
        Ok(Parsed::NotConsumed)
    }
}

impl CommandParser for Scp {
    type Output = ScpResult;

    fn command_string(&self) -> String {
        match &self.options {
            Some(options) => format!("scp {} {} {}", options, self.source, self.dest),
            None => format!("scp {} {}", self.source, self.dest),
        }
    }

    fn parse_chain(&self) -> ParseChain<Self> {
        ParseChain::new()
            .handler("known_hosts", Scp::parse_known_hosts)
            .handler("success", Scp::parse_success)
            .handler("continue_connecting", Scp::push_yes_if_needed)
            .handler("password", Scp::parse_sent_password)
            .handler("failed", Scp::parse_failed)
            .handler("hosts_file", Scp::parse_hosts_file)
    }

    // Interactive prompts wait for input without a trailing newline.
    fn on_partial_line(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<()> {
        self.push_yes_if_needed(line, ctx)?;
        self.parse_sent_password(line, ctx)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ret.file_names.is_empty() {
            return Err(ObserverError::CommandFailure {
                command: self.command_string(),
                reason: "no file was transferred".to_string(),
            });
        }
        Ok(())
    }

    fn result(&self) -> ScpResult {
        self.ret.clone()
    }
}
