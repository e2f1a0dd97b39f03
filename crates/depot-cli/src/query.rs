use std::sync::Arc;

use depot_core::{FindFlags, Request, RequirementPoolBuilder};
use depot_registry::{Advisory, AnyVersion, Constraint, ConstraintMap, Package};
use miette::Result;
use nu_ansi_term::Color::{Blue, Cyan, Green, LightRed, Yellow};
use serde_json::json;
use tracing::info;

use crate::{
    context::DepotContext,
    utils::{parse_package_arg, Colored},
};

fn package_json(package: &Package) -> serde_json::Value {
    json!({
        "name": package.pretty_name,
        "version": package.version,
        "stability": package.stability.to_string(),
        "repository": package.repository,
        "description": package.description,
        "alias_of": package.alias_of.as_ref().map(|target| target.version.clone()),
    })
}

fn print_packages(packages: &[Arc<Package>], json: bool) {
    if json {
        let list: Vec<_> = packages.iter().map(|p| package_json(p)).collect();
        println!("{}", serde_json::Value::Array(list));
        return;
    }
    for package in packages {
        info!(
            "{} {} [{}] {}",
            Colored(Blue, &package.pretty_name),
            Colored(LightRed, &package.version),
            Colored(Green, &package.repository),
            Colored(Cyan, package.stability),
        );
    }
}

pub fn show(ctx: &DepotContext, arg: &str, all: bool, any_stability: bool, json: bool) -> Result<()> {
    let (name, constraint) = parse_package_arg(arg)?;
    let mut flags = FindFlags::NONE;
    if all {
        flags = flags | FindFlags::ALLOW_SHADOWED;
    }
    if any_stability {
        flags = flags | FindFlags::ALLOW_ANY_STABILITY;
    }

    let packages = ctx
        .repositories
        .find_packages(&name, constraint.as_deref(), flags)?;
    if packages.is_empty() && !json {
        info!("No versions of {name} found");
        return Ok(());
    }
    print_packages(&packages, json);
    Ok(())
}

pub fn providers(ctx: &DepotContext, name: &str, json: bool) -> Result<()> {
    let providers = ctx.repositories.get_providers(name)?;
    if json {
        let list: Vec<_> = providers
            .iter()
            .map(|p| json!({"name": p.name, "description": p.description, "type": p.kind}))
            .collect();
        println!("{}", serde_json::Value::Array(list));
        return Ok(());
    }
    if providers.is_empty() {
        info!("Nothing provides {name}");
    }
    for provider in providers {
        info!(
            "{} {}",
            Colored(Blue, &provider.name),
            provider.description.unwrap_or_default()
        );
    }
    Ok(())
}

fn print_advisory(advisory: &Advisory) {
    info!(
        "  {} {} ({})",
        Colored(Yellow, advisory.advisory_id()),
        advisory.title().unwrap_or("untitled"),
        advisory.affected_versions(),
    );
}

pub fn audit(ctx: &DepotContext, args: &[String], allow_partial: bool, json: bool) -> Result<()> {
    let mut packages = ConstraintMap::new();
    for arg in args {
        let (name, constraint) = parse_package_arg(arg)?;
        packages.insert(name, constraint.unwrap_or_else(|| Box::new(AnyVersion) as Box<dyn Constraint>));
    }

    let result = ctx
        .repositories
        .get_security_advisories(&packages, allow_partial)?;

    if json {
        let map: serde_json::Map<_, _> = result
            .advisories
            .iter()
            .map(|(name, list)| {
                let list: Vec<_> = list
                    .iter()
                    .map(|a| {
                        json!({
                            "advisoryId": a.advisory_id(),
                            "title": a.title(),
                            "affectedVersions": a.affected_versions(),
                        })
                    })
                    .collect();
                (name.clone(), serde_json::Value::Array(list))
            })
            .collect();
        println!("{}", serde_json::Value::Object(map));
        return Ok(());
    }

    if result.is_empty() {
        info!("No security advisories found");
        return Ok(());
    }
    for (name, list) in &result.advisories {
        if list.is_empty() {
            continue;
        }
        info!("{}", Colored(Blue, name));
        for advisory in list {
            print_advisory(advisory);
        }
    }
    Ok(())
}

pub fn resolve(ctx: &mut DepotContext, args: &[String], json: bool) -> Result<()> {
    let mut request = Request::new();
    for arg in args {
        let (name, constraint) = parse_package_arg(arg)?;
        request.require(&name, constraint);
    }

    let mut builder = RequirementPoolBuilder::new();
    let pool = ctx.repositories.build_pool(&request, &mut builder)?;
    if !json {
        info!(
            "Loaded {} packages in {} rounds",
            pool.len(),
            builder.rounds()
        );
    }
    print_packages(pool.packages(), json);
    Ok(())
}
