use cd_domain::config::AssistantConfig;

#[test]
fn empty_config_is_usable() {
    let config: AssistantConfig = toml::from_str("").unwrap();
    assert_eq!(config.run.max_tool_rounds, 10);
    assert_eq!(config.tools.handler_timeout_ms, 30_000);
    assert_eq!(config.llm.request_timeout_ms, 120_000);
    assert!(config.quota.default_hourly_requests.is_none());
}

#[test]
fn default_provider_points_at_messages_endpoint() {
    let config = AssistantConfig::default();
    assert_eq!(config.llm.provider.base_url, "https://api.anthropic.com");
    assert_eq!(config.llm.provider.api_key_env, "CREWDESK_MODEL_API_KEY");
}

#[test]
fn quota_limits_parse_and_resolve() {
    let toml_str = r#"
[quota]
default_hourly_requests = 100
default_daily_tokens = 200000

[quota.per_tenant.acme]
hourly_requests = 10
monthly_tokens = 1000000
"#;
    let config: AssistantConfig = toml::from_str(toml_str).unwrap();

    let acme = config.quota.limits_for("acme");
    assert_eq!(acme.hourly_requests, Some(10)); // override wins
    assert_eq!(acme.daily_tokens, Some(200_000)); // falls back to default
    assert_eq!(acme.monthly_tokens, Some(1_000_000));

    let other = config.quota.limits_for("globex");
    assert_eq!(other.hourly_requests, Some(100));
    assert_eq!(other.monthly_tokens, None); // no default, no override
}

#[test]
fn pricing_table_parses() {
    let toml_str = r#"
[llm]
fallback_per_1m = 4.0

[llm.pricing."claude-sonnet-4-20250514"]
input_per_1m = 3.0
output_per_1m = 15.0
"#;
    let config: AssistantConfig = toml::from_str(toml_str).unwrap();
    let pricing = &config.llm.pricing["claude-sonnet-4-20250514"];
    let cost = pricing.estimate_cost(1_000_000, 100_000);
    assert!((cost - 4.5).abs() < 1e-9);
    assert_eq!(config.llm.fallback_per_1m, Some(4.0));
}

#[test]
fn max_tool_rounds_parses() {
    let config: AssistantConfig = toml::from_str("[run]\nmax_tool_rounds = 3\n").unwrap();
    assert_eq!(config.run.max_tool_rounds, 3);
}
