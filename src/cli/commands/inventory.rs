//! Inventory commands - `list-hosts`, `vars` and `graph`

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use steward::inventory::{GroupGraph, Inventory};
use steward::template::TemplateEngine;
use steward::vars::{PlayScopes, VariableResolver};

/// Arguments for list-hosts command
#[derive(Parser, Debug, Clone)]
pub struct ListHostsArgs {
    /// Host pattern to match
    #[arg(default_value = "all")]
    pub pattern: String,
}

/// Arguments for vars command
#[derive(Parser, Debug, Clone)]
pub struct VarsArgs {
    /// Host whose variables to show
    pub host: String,
}

/// Arguments for graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Group at the top of the tree
    #[arg(default_value = "all")]
    pub group: String,
}

/// One group of the tree printed by `graph`
#[derive(Debug, Clone, Serialize)]
pub struct GroupNode {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GroupNode>,
}

impl GroupNode {
    /// Build the subtree under `name`. Hosts of `all` are shown under
    /// `ungrouped` or their groups instead.
    fn build(inventory: &Inventory, graph: &GroupGraph, name: &str) -> Self {
        let hosts = match inventory.get_group(name) {
            Some(group) if name != "all" => group.hosts.iter().cloned().collect(),
            _ => Vec::new(),
        };
        let children = graph
            .children(name)
            .iter()
            .map(|child| GroupNode::build(inventory, graph, child))
            .filter(|node| node.name != "ungrouped" || !node.hosts.is_empty())
            .collect();
        Self {
            name: name.to_string(),
            hosts,
            children,
        }
    }

    fn print(&self, prefix: &str) {
        println!("{}{}:", prefix, format!("@{}", self.name).cyan());
        let nested = format!("{}  |", prefix.trim_end_matches("--"));
        for child in &self.children {
            child.print(&format!("{}--", nested));
        }
        for host in &self.hosts {
            println!("{}--{}", nested, host.green());
        }
    }
}

impl ListHostsArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let mut hosts: Vec<String> = inventory
            .hosts_for_pattern(&self.pattern)
            .map_err(steward::Error::from)?
            .into_iter()
            .map(|h| h.name.clone())
            .collect();

        if let Some(limit) = &ctx.limit {
            let allowed: Vec<String> = inventory
                .hosts_for_pattern(limit)
                .map_err(steward::Error::from)?
                .into_iter()
                .map(|h| h.name.clone())
                .collect();
            hosts.retain(|h| allowed.contains(h));
        }

        ctx.output.emit(&hosts, || {
            println!("  hosts ({}):", hosts.len());
            for host in &hosts {
                println!("    {}", host);
            }
        })?;
        Ok(0)
    }
}

impl VarsArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let graph = GroupGraph::build(&inventory).map_err(steward::Error::from)?;

        let scopes = PlayScopes {
            extra_vars: ctx.parse_extra_vars()?,
            ..Default::default()
        };
        let resolved = VariableResolver::new(&inventory, &graph)
            .with_hash_behaviour(ctx.config.defaults.hash_behaviour)
            .resolve(&self.host, &scopes)?;
        let vars = resolved.template_all(&TemplateEngine::new())?;

        ctx.output.emit(&vars, || {
            for (key, value) in &vars {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                println!("{} = {}", key.cyan(), rendered);
            }
        })?;
        Ok(0)
    }
}

impl GraphArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let graph = GroupGraph::build(&inventory).map_err(steward::Error::from)?;
        if !graph.contains(&self.group) {
            return Err(steward::Error::Inventory(
                steward::inventory::InventoryError::GroupNotFound(self.group.clone()),
            )
            .into());
        }

        let tree = GroupNode::build(&inventory, &graph, &self.group);
        ctx.output.emit(&tree, || tree.print(""))?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for ListHostsArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[async_trait::async_trait]
impl Runnable for VarsArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[async_trait::async_trait]
impl Runnable for GraphArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
all:
  children:
    web:
      hosts:
        web1:
        web2:
      children:
        web_prod:
          hosts:
            web3:
    db:
      hosts:
        db1:
"#;

    #[test]
    fn test_group_tree() {
        let inventory = Inventory::from_yaml(INVENTORY).unwrap();
        let graph = GroupGraph::build(&inventory).unwrap();
        let tree = GroupNode::build(&inventory, &graph, "all");

        assert!(tree.hosts.is_empty());
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);

        let web = &tree.children[0];
        assert_eq!(web.hosts, vec!["web1", "web2"]);
        assert_eq!(web.children[0].name, "web_prod");
        assert_eq!(web.children[0].hosts, vec!["web3"]);
    }
}
