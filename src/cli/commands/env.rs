//! Environment command implementations.
//!
//! The registry lives in `~/.harbor/environments.json` and is never
//! synchronized; every machine keeps its own.

use colored::Colorize;
use serde::Serialize;

use crate::cli::EnvCommands;
use crate::environment::{
    parse_binding, Bindings, DetectionRule, Environment, EnvironmentRegistry, PathAnalysis,
    SystemProbe,
};
use crate::error::Result;

/// Execute environment commands.
///
/// # Errors
///
/// Returns registry validation, lookup and resolution errors.
pub fn execute(command: &EnvCommands, json: bool) -> Result<()> {
    let mut registry = EnvironmentRegistry::open_default()?;

    match command {
        EnvCommands::Register {
            name,
            bindings,
            hostname,
            marker_path,
        } => {
            let detection = DetectionRule {
                hostname: hostname.clone(),
                marker_path: marker_path.clone(),
            };
            let env = registry.register(name, &parse_bindings(bindings)?, detection)?;
            print_environment(&env, json, "Registered")
        }
        EnvCommands::List => list(&registry, json),
        EnvCommands::Current => print_environment(&registry.current()?, json, "Current"),
        EnvCommands::Switch { name } => {
            let env = registry.switch(name)?;
            print_environment(&env, json, "Switched to")
        }
        EnvCommands::Detect { switch } => detect(&mut registry, *switch, json),
        EnvCommands::Update {
            name,
            bindings,
            unbind,
            hostname,
            marker_path,
        } => {
            let detection = if hostname.is_some() || marker_path.is_some() {
                let existing = registry.get(name)?.detection;
                Some(DetectionRule {
                    hostname: hostname.clone().or(existing.hostname),
                    marker_path: marker_path.clone().or(existing.marker_path),
                })
            } else {
                None
            };
            let env = registry.update(name, &parse_bindings(bindings)?, unbind, detection)?;
            print_environment(&env, json, "Updated")
        }
        EnvCommands::Delete { name } => {
            registry.delete(name)?;
            if json {
                super::print_json(&serde_json::json!({ "deleted": name }))
            } else {
                println!("Deleted environment {name}");
                Ok(())
            }
        }
        EnvCommands::Resolve { paths } => resolve(&registry, paths, json),
    }
}

fn parse_bindings(specs: &[String]) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    for spec in specs {
        let (name, path) = parse_binding(spec)?;
        bindings.insert(name, path);
    }
    Ok(bindings)
}

fn print_environment(env: &Environment, json: bool, verb: &str) -> Result<()> {
    if json {
        return super::print_json(env);
    }

    println!("{verb} {}", env.name.cyan().bold());
    print_details(env);
    Ok(())
}

fn print_details(env: &Environment) {
    if let Some(hostname) = &env.detection.hostname {
        println!("  hostname:    {hostname}");
    }
    if let Some(marker) = &env.detection.marker_path {
        println!("  marker path: {marker}");
    }
    if env.bindings.is_empty() {
        println!("  {}", "no bindings".dimmed());
    }
    for (variable, path) in &env.bindings {
        println!("  ${variable:<12} {path}");
    }
}

fn list(registry: &EnvironmentRegistry, json: bool) -> Result<()> {
    let environments = registry.list();
    if json {
        return super::print_json(&environments);
    }

    if environments.is_empty() {
        println!("{}", "No environments registered.".dimmed());
        return Ok(());
    }
    for env in &environments {
        let marker = if env.is_current { "*".green().bold() } else { " ".normal() };
        println!("{marker} {}", env.name.bold());
        print_details(env);
    }
    Ok(())
}

#[derive(Serialize)]
struct DetectOutput<'a> {
    environment: Option<&'a Environment>,
    switched: bool,
}

fn detect(registry: &mut EnvironmentRegistry, switch: bool, json: bool) -> Result<()> {
    let detected = registry.detect(&SystemProbe)?;

    let mut switched = false;
    let detected = match detected {
        Some(env) if switch && !env.is_current => {
            switched = true;
            Some(registry.switch(&env.name)?)
        }
        other => other,
    };

    if json {
        return super::print_json(&DetectOutput {
            environment: detected.as_ref(),
            switched,
        });
    }

    match &detected {
        Some(env) if switched => println!("Detected and switched to {}", env.name.cyan().bold()),
        Some(env) if env.is_current => println!("Detected {} (current)", env.name.cyan().bold()),
        Some(env) => println!(
            "Detected {}. Run 'harbor env switch {}' to use it.",
            env.name.cyan().bold(),
            env.name
        ),
        None => println!("{}", "No environment matches this machine.".yellow()),
    }
    Ok(())
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    environment: &'a str,
    paths: Vec<PathAnalysis>,
}

fn resolve(registry: &EnvironmentRegistry, paths: &[String], json: bool) -> Result<()> {
    let resolver = registry.resolver()?;
    let analyses = resolver.analyze_batch(paths);

    if json {
        return super::print_json(&ResolveOutput {
            environment: resolver.environment(),
            paths: analyses,
        });
    }

    for analysis in &analyses {
        println!("{}", analysis.original.bold());
        println!("  logical:  {}", analysis.logical);
        match &analysis.absolute {
            Some(absolute) => println!("  absolute: {absolute}"),
            None => println!(
                "  absolute: {}",
                format!(
                    "unresolvable in {}",
                    resolver.environment()
                )
                .red()
            ),
        }
    }
    Ok(())
}
