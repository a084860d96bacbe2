//! `MAP`/`EXCLUDE` host-mapping rules, grounded on
//! `net/base/host_mapping_rules.h` and its unittest's grammar: a
//! comma-separated rule list, each rule one of
//! `MAP <hostname_pattern> <replacement_host>[:<replacement_port>]` or
//! `EXCLUDE <hostname_pattern>`, with `*` glob matching and first-match-wins
//! ordering. `EXCLUDE` takes precedence regardless of where it sits in the
//! list (the unittest's "matched but excluded" case).

use stream_factory::HostMappingRules;

#[derive(Debug, Clone)]
struct Pattern {
	host_glob: Box<str>,
	port: Option<u16>,
}

impl Pattern {
	fn parse(token: &str) -> Self {
		match token.rsplit_once(':') {
			Some((host, port)) if port.parse::<u16>().is_ok() => Self {
				host_glob: host.into(),
				port: port.parse().ok(),
			},
			_ => Self { host_glob: token.into(), port: None },
		}
	}

	fn matches(&self, host: &str, port: u16) -> bool {
		glob_match(&self.host_glob, host) && self.port.is_none_or(|p| p == port)
	}
}

#[derive(Debug, Clone)]
enum Rule {
	Map { pattern: Pattern, host: Box<str>, port: Option<u16> },
	Exclude { pattern: Pattern },
}

/// Glob match limited to a single leading or trailing `*`, which is all the
/// grammar above ever produces.
fn glob_match(pattern: &str, host: &str) -> bool {
	if let Some(suffix) = pattern.strip_prefix('*') {
		host.ends_with(suffix)
	} else if let Some(prefix) = pattern.strip_suffix('*') {
		host.starts_with(prefix)
	} else {
		pattern == host
	}
}

pub struct ChromiumHostMappingRules {
	rules: Vec<Rule>,
}

impl ChromiumHostMappingRules {
	pub fn new() -> Self {
		Self { rules: Vec::new() }
	}

	/// Parses a comma-separated rule list. Invalid rules are discarded
	/// silently, matching the original's `AddRuleFromString` contract.
	pub fn from_rules_string(rules_string: &str) -> Self {
		let mut rules = Self::new();
		for rule in rules_string.split(',') {
			rules.add_rule(rule.trim());
		}
		rules
	}

	fn add_rule(&mut self, rule: &str) -> bool {
		let mut tokens = rule.split_whitespace();
		let Some(kind) = tokens.next() else { return false };

		match kind.to_ascii_uppercase().as_str() {
			"MAP" => {
				let (Some(pattern), Some(replacement), None) =
					(tokens.next(), tokens.next(), tokens.next())
				else {
					return false;
				};
				let (host, port) = match replacement.rsplit_once(':') {
					Some((h, p)) => match p.parse::<u16>() {
						Ok(p) => (h, Some(p)),
						Err(_) => return false,
					},
					None => (replacement, None),
				};
				self.rules.push(Rule::Map {
					pattern: Pattern::parse(pattern),
					host: host.into(),
					port,
				});
				true
			},
			"EXCLUDE" => {
				let (Some(pattern), None) = (tokens.next(), tokens.next()) else {
					return false;
				};
				self.rules.push(Rule::Exclude { pattern: Pattern::parse(pattern) });
				true
			},
			_ => false,
		}
	}
}

impl Default for ChromiumHostMappingRules {
	fn default() -> Self {
		Self::new()
	}
}

impl HostMappingRules for ChromiumHostMappingRules {
	/// Exclusion rules are checked before any map rule, regardless of their
	/// relative position in the rule list — mirrors `HostMappingRules::
	/// RewriteHost` checking `exclusion_rules_` ahead of `map_rules_`.
	fn rewrite(&self, host: &str, port: u16) -> (Box<str>, u16) {
		let excluded = self.rules.iter().any(|rule| match rule {
			Rule::Exclude { pattern } => pattern.matches(host, port),
			Rule::Map { .. } => false,
		});
		if excluded {
			return (host.into(), port);
		}

		for rule in &self.rules {
			if let Rule::Map { pattern, host: replacement, port: replacement_port } = rule {
				if pattern.matches(host, port) {
					return (replacement.clone(), replacement_port.unwrap_or(port));
				}
			}
		}
		(host.into(), port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_rules_from_string_matches_unittest_fixture() {
		let rules =
			ChromiumHostMappingRules::from_rules_string("map *.com baz , map *.net bar:60, EXCLUDE *.foo.com");

		assert_eq!(rules.rewrite("test", 1234), ("test".into(), 1234));

		assert_eq!(rules.rewrite("chrome.net", 80), ("bar".into(), 60));

		assert_eq!(rules.rewrite("crack.com", 80), ("baz".into(), 80));

		assert_eq!(rules.rewrite("wtf.foo.com", 666), ("wtf.foo.com".into(), 666));
	}

	#[test]
	fn port_specific_matching() {
		let rules = ChromiumHostMappingRules::from_rules_string(
			"map *.com:80 baz:111 , map *.com:443 blat:333, EXCLUDE *.foo.com",
		);

		assert_eq!(rules.rewrite("test.com", 1234), ("test.com".into(), 1234));
		assert_eq!(rules.rewrite("crack.com", 80), ("baz".into(), 111));
		assert_eq!(rules.rewrite("wtf.com", 443), ("blat".into(), 333));
		assert_eq!(rules.rewrite("wtf.foo.com", 443), ("wtf.foo.com".into(), 443));
	}

	#[test]
	fn invalid_rules_are_silently_discarded() {
		let mut rules = ChromiumHostMappingRules::new();
		assert!(!rules.add_rule("xyz"));
		assert!(!rules.add_rule(""));
		assert!(!rules.add_rule(" "));
		assert!(!rules.add_rule("EXCLUDE"));
		assert!(!rules.add_rule("EXCLUDE foo bar"));
		assert!(!rules.add_rule("INCLUDE"));
		assert!(!rules.add_rule("INCLUDE x"));
		assert!(!rules.add_rule("INCLUDE x :10"));
	}
}
