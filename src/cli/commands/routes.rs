use crate::cli::OutputFormat;
use crate::config::GatewayConfig;
use crate::gateway::RouteClassifier;

pub fn handle(config: GatewayConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let routes = config.routes()?;

    if let OutputFormat::Json = output_format {
        println!("{}", serde_json::to_string_pretty(&routes)?);
        return Ok(());
    }

    let classifier = RouteClassifier::new(&config.security.public_routes);
    for rule in &routes {
        let access = if !rule.requires_auth || classifier.is_public(&rule.prefix) {
            "public"
        } else {
            "bearer"
        };
        println!(
            "{:<10} {:<6} {:<8} {:<32} {}",
            rule.prefix,
            access,
            rule.service,
            rule.upstream.as_str(),
            rule.rewrite.describe()
        );
    }

    Ok(())
}
