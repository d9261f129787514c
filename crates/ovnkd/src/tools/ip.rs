//! `ip` show commands: addresses, links, routes, neighbours, rules.

use super::{LiveContext, OutputParams};
use ovnk_common::validate;
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};

/// Named routing tables accepted besides numeric ids
const ROUTE_TABLES: &[&str] = &["main", "local", "default"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

fn optional_interface(value: Option<&str>) -> DiagResult<&str> {
    let interface = validate::non_blank(value).unwrap_or_default();
    if !interface.is_empty() {
        validate::interface_name("interface", interface)?;
    }
    Ok(interface)
}

pub fn build_addr_show(params: &InterfaceParams) -> DiagResult<CommandSpec> {
    let interface = optional_interface(params.interface.as_deref())?;
    Ok(CommandSpec::new("ip")
        .add(["addr", "show"])
        .add_if_not_empty(interface, ["dev", interface]))
}

pub fn build_link_show(params: &InterfaceParams) -> DiagResult<CommandSpec> {
    let interface = optional_interface(params.interface.as_deref())?;
    Ok(CommandSpec::new("ip")
        .add(["link", "show"])
        .add_if_not_empty(interface, ["dev", interface]))
}

pub async fn addr_show(ctx: &LiveContext, params: InterfaceParams) -> DiagResult<ToolOutput> {
    let command = build_addr_show(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

pub async fn link_show(ctx: &LiveContext, params: InterfaceParams) -> DiagResult<ToolOutput> {
    let command = build_link_show(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteShowParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_route_show(params: &RouteShowParams) -> DiagResult<CommandSpec> {
    let table = validate::non_blank(params.table.as_deref()).unwrap_or_default();
    if !table.is_empty() && table.parse::<u32>().is_err() && !ROUTE_TABLES.contains(&table) {
        return Err(DiagError::invalid_input(
            "table",
            format!("invalid table name: {} (use a number, main, local or default)", table),
        ));
    }

    let destination = validate::non_blank(params.destination.as_deref()).unwrap_or_default();
    if !destination.is_empty() && destination != "default" {
        validate::ip_network("destination", destination)?;
    }

    Ok(CommandSpec::new("ip")
        .add(["route", "show"])
        .add_if_not_empty(table, ["table", table])
        .add_if_not_empty(destination, [destination]))
}

pub async fn route_show(ctx: &LiveContext, params: RouteShowParams) -> DiagResult<ToolOutput> {
    let command = build_route_show(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighShowParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_neigh_show(params: &NeighShowParams) -> DiagResult<CommandSpec> {
    let interface = optional_interface(params.interface.as_deref())?;
    let address = validate::non_blank(params.address.as_deref()).unwrap_or_default();
    if !address.is_empty() {
        validate::ip_addr("address", address)?;
    }

    Ok(CommandSpec::new("ip")
        .add(["neigh", "show"])
        .add_if_not_empty(interface, ["dev", interface])
        .add_if_not_empty(address, [address]))
}

pub async fn neigh_show(ctx: &LiveContext, params: NeighShowParams) -> DiagResult<ToolOutput> {
    let command = build_neigh_show(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleShowParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub async fn rule_show(ctx: &LiveContext, params: RuleShowParams) -> DiagResult<ToolOutput> {
    let command = CommandSpec::new("ip").add(["rule", "show"]);
    ctx.run_on(command, &params.target, &params.output).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_and_link() {
        let params = InterfaceParams {
            interface: Some("br-ex".into()),
            ..InterfaceParams::default()
        };
        assert_eq!(
            build_addr_show(&params).unwrap().build(),
            vec!["ip", "addr", "show", "dev", "br-ex"]
        );
        assert_eq!(
            build_link_show(&InterfaceParams::default()).unwrap().build(),
            vec!["ip", "link", "show"]
        );

        let bad = InterfaceParams {
            interface: Some("eth0 up".into()),
            ..InterfaceParams::default()
        };
        assert!(build_link_show(&bad).is_err());
    }

    #[test]
    fn test_route_show() {
        let params = RouteShowParams {
            table: Some("254".into()),
            destination: Some("10.128.0.0/14".into()),
            ..RouteShowParams::default()
        };
        assert_eq!(
            build_route_show(&params).unwrap().build(),
            vec!["ip", "route", "show", "table", "254", "10.128.0.0/14"]
        );

        for (table, destination) in [("nat", ""), ("main", "10.0.0.0/40"), ("", "exec")] {
            let params = RouteShowParams {
                table: Some(table.into()),
                destination: Some(destination.into()),
                ..RouteShowParams::default()
            };
            assert!(build_route_show(&params).is_err(), "{} {}", table, destination);
        }
    }

    #[test]
    fn test_neigh_show() {
        let params = NeighShowParams {
            interface: Some("eth0".into()),
            address: Some("192.168.1.1".into()),
            ..NeighShowParams::default()
        };
        assert_eq!(
            build_neigh_show(&params).unwrap().build(),
            vec!["ip", "neigh", "show", "dev", "eth0", "192.168.1.1"]
        );
    }
}
