//! Component and package discovery from the applications list
//!
//! Applications entries are either plain component names, aliased
//! components (`<component> as <alias>`), or packages (`pkg.<name>`).
//! Every plainly listed component gets its identity alias; duplicate or
//! conflicting aliases are fatal.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::error::{Error, Result};
use crate::package::package_name;

/// Components and their aliases extracted from one applications list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoveredComponents {
    /// Sorted component names.
    pub components: Vec<String>,
    /// Alias to component name. Plain entries map to themselves.
    pub aliases: BTreeMap<String, String>,
}

/// Package names referenced in the applications list.
pub fn discover_packages(applications: &[String]) -> Vec<String> {
    let mut packages: Vec<String> = applications
        .iter()
        .filter_map(|a| package_name(a))
        .map(str::to_string)
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

/// Extract components and their instance aliases, validating uniqueness.
pub fn discover_components(applications: &[String]) -> Result<DiscoveredComponents> {
    let mut components = BTreeSet::new();
    let mut all_aliases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for entry in applications {
        if package_name(entry).is_some() {
            continue;
        }
        let (cn, alias) = match entry.split_once(" as ") {
            Some((cn, alias)) => (cn.trim(), alias.trim()),
            None => (entry.as_str(), entry.as_str()),
        };
        if cn != alias {
            debug!("found component {} aliased to {}", cn, alias);
        } else {
            debug!("found component {}", cn);
        }
        components.insert(cn.to_string());
        all_aliases
            .entry(alias.to_string())
            .or_default()
            .insert(cn.to_string());
    }

    let mut aliases = BTreeMap::new();
    for (alias, cns) in all_aliases {
        if cns.len() > 1 {
            if cns.contains(&alias) {
                let others: Vec<String> =
                    cns.iter().filter(|cn| **cn != alias).cloned().collect();
                return Err(Error::config(format!(
                    "Component{} {} alias{} existing component '{}'",
                    if others.len() > 1 { "s" } else { "" },
                    others.join(", "),
                    if others.len() > 1 { "" } else { "es" },
                    alias
                )));
            }
            return Err(Error::DuplicateInstance {
                alias,
                components: cns.into_iter().collect::<Vec<_>>().join(", "),
            });
        }
        let cn = cns.into_iter().next().expect("alias has one component");
        aliases.insert(alias, cn);
    }

    Ok(DiscoveredComponents {
        components: components.into_iter().collect(),
        aliases,
    })
}
