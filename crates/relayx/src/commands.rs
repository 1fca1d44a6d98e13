use colored::Colorize;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};

pub struct Client {
    base: String,
    http: reqwest::blocking::Client,
    caller: Option<String>,
}

impl Client {
    pub fn new(base: &str, caller: Option<&str>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::blocking::Client::new(),
            caller: caller.map(|c| c.to_string()),
        }
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, String> {
        let url = format!("{}{}", self.base, path);
        self.http
            .get(&url)
            .send()
            .map_err(|e| format!("request failed: {e}"))
    }

    fn post(&self, path: &str, body: &Value) -> Result<reqwest::blocking::Response, String> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.http.post(&url).json(body);
        if let Some(ref caller) = self.caller {
            req = req.header("x-caller-id", caller);
        }
        req.send().map_err(|e| format!("request failed: {e}"))
    }
}

/// Read the status and JSON body, turning a non-2xx into `HTTP <code>: ...`.
fn read_response(resp: reqwest::blocking::Response) -> Result<Value, String> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let json: Value = resp.json().map_err(|e| format!("parse response: {e}"))?;
    if status.is_success() {
        return Ok(json);
    }
    let retry_after = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    Err(error_message(status.as_u16(), &json, retry_after))
}

/// Render the gateway's `{error:{code, message, details}}` envelope.
pub fn error_message(status: u16, body: &Value, retry_after: Option<u64>) -> String {
    let err = body.get("error");
    let code = err.and_then(|e| e.get("code")).and_then(|c| c.as_str()).unwrap_or("error");
    let message = err
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error");
    let mut out = format!("HTTP {status}: {code}: {message}");

    if let Some(fields) = err
        .and_then(|e| e.pointer("/details/fields"))
        .and_then(|f| f.as_array())
    {
        for f in fields {
            let name = f.get("field").and_then(|v| v.as_str()).unwrap_or("?");
            let msg = f.get("message").and_then(|v| v.as_str()).unwrap_or("");
            out.push_str(&format!("\n  {name}: {msg}"));
        }
    }
    if let Some(secs) = retry_after {
        out.push_str(&format!(" (retry in {secs}s)"));
    }
    out
}

/// Load a JSON object from a file, `-` for stdin, or `{}` when absent.
pub fn read_object(path: Option<&str>, what: &str) -> Result<Value, String> {
    let content = match path {
        None => return Ok(json!({})),
        Some("-") => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("read stdin: {e}"))?;
            buf
        }
        Some(p) => fs::read_to_string(p).map_err(|e| format!("read {what}: {e}"))?,
    };
    let value: Value = serde_json::from_str(&content).map_err(|e| format!("parse {what}: {e}"))?;
    if !value.is_object() {
        return Err(format!("parse {what}: expected a JSON object"));
    }
    Ok(value)
}

// ── adapters ────────────────────────────────────────────────────

pub fn adapters(client: &Client) -> Result<(), String> {
    let json = read_response(client.get("/api/adapters")?)?;
    let list = json.get("adapters").and_then(|a| a.as_array()).ok_or("expected adapters array")?;

    if list.is_empty() {
        println!("{}", "No adapters registered.".dimmed());
        return Ok(());
    }

    println!("{} {} adapters\n", "Registry:".bold(), list.len());
    for a in list {
        let name = a.get("name").and_then(|n| n.as_str()).unwrap_or("?");
        let version = a.get("version").and_then(|v| v.as_str()).unwrap_or("?");
        let auth = a.get("authType").and_then(|t| t.as_str()).unwrap_or("?");
        let tools: Vec<&str> = a
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|t| t.iter().filter_map(|x| x.as_str()).collect())
            .unwrap_or_default();
        println!("  {} {} {}", name.cyan().bold(), format!("v{version}").dimmed(), auth.blue());
        println!("    {}", tools.join(", ").dimmed());
    }
    Ok(())
}

// ── adapter ─────────────────────────────────────────────────────

pub fn adapter(client: &Client, name: &str) -> Result<(), String> {
    let json = read_response(client.get(&format!("/api/adapters/{name}"))?)?;

    let version = json.get("version").and_then(|v| v.as_str()).unwrap_or("?");
    let base = json.get("baseUrl").and_then(|b| b.as_str()).unwrap_or("?");
    let auth = json.get("authType").and_then(|t| t.as_str()).unwrap_or("?");
    println!("{} {}", name.cyan().bold(), format!("v{version}").dimmed());
    println!("  {} {}", "base:   ".dimmed(), base);
    println!("  {} {}", "auth:   ".dimmed(), auth.blue());
    if let Some(fp) = json.get("fingerprint").and_then(|f| f.as_str()) {
        println!("  {} {}", "digest: ".dimmed(), fp.dimmed());
    }

    if let Some(circuit) = json.get("circuit") {
        let state = circuit.get("state").and_then(|s| s.as_str()).unwrap_or("?");
        let badge = match state {
            "closed" => state.green().bold(),
            "open" => state.red().bold(),
            _ => state.yellow().bold(),
        };
        let failures = circuit.get("failureCount").and_then(|f| f.as_u64()).unwrap_or(0);
        println!("  {} {} ({} recent failures)", "circuit:".dimmed(), badge, failures);
    }

    if let Some(tools) = json.get("tools").and_then(|t| t.as_array()) {
        println!();
        println!("{}", "Tools:".bold());
        for t in tools {
            let tname = t.get("name").and_then(|n| n.as_str()).unwrap_or("?");
            let desc = t.get("description").and_then(|d| d.as_str()).unwrap_or("");
            println!("  {} {}", tname.cyan(), desc.dimmed());
            if let Some(props) = t.pointer("/inputSchema/properties").and_then(|p| p.as_object()) {
                for (param, spec) in props {
                    let ty = spec.get("type").and_then(|x| x.as_str()).unwrap_or("any");
                    let required = spec.get("required").and_then(|r| r.as_bool()).unwrap_or(false);
                    let mark = if required { "*".red() } else { " ".normal() };
                    println!("    {mark} {param}: {}", ty.dimmed());
                }
            }
        }
    }
    Ok(())
}

// ── exec ────────────────────────────────────────────────────────

pub fn exec(
    client: &Client,
    adapter: &str,
    tool: &str,
    params: Option<&str>,
    metadata: Option<&str>,
) -> Result<(), String> {
    let parameters = read_object(params, "params")?;
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("parse metadata: {e}"))?,
        None => json!({}),
    };

    let body = json!({ "parameters": parameters, "metadata": metadata });
    let json = read_response(client.post(&format!("/api/execute/{adapter}/{tool}"), &body)?)?;

    let ms = json.get("durationMs").and_then(|d| d.as_u64()).unwrap_or(0);
    println!("{} {}/{} {}", "✓".green().bold(), adapter.cyan(), tool.cyan(), format!("{ms}ms").dimmed());
    let output = json.get("output").cloned().unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
    Ok(())
}

// ── audit ───────────────────────────────────────────────────────

pub fn audit(client: &Client) -> Result<(), String> {
    let json = read_response(client.get("/api/audit/report")?)?;

    if let Some(summary) = json.get("summary") {
        let total = summary.get("total_records").and_then(|t| t.as_u64()).unwrap_or(0);
        let ok = summary.get("success_count").and_then(|t| t.as_u64()).unwrap_or(0);
        let failed = summary.get("failure_count").and_then(|t| t.as_u64()).unwrap_or(0);
        let mean = summary.get("mean_duration_ms").and_then(|t| t.as_f64()).unwrap_or(0.0);
        println!("{}", "Audit Summary".bold());
        println!("  {} {}", "Total records:".dimmed(), total);
        println!("  {} {} ok, {} failed", "Outcome:      ".dimmed(), ok.to_string().green(), failed.to_string().red());
        println!("  {} {:.1}ms", "Mean latency: ".dimmed(), mean);
    }

    if let Some(by_adapter) = json.get("by_adapter").and_then(|d| d.as_object()) {
        println!("  {}:", "By adapter".dimmed());
        for (name, count) in by_adapter {
            println!("    {} {count}", name.cyan());
        }
    }

    if let Some(by_error) = json.get("by_error").and_then(|d| d.as_object()) {
        if !by_error.is_empty() {
            println!("  {}:", "By error".dimmed());
            for (code, count) in by_error {
                println!("    {} {count}", code.red());
            }
        }
    }
    Ok(())
}

// ── health ──────────────────────────────────────────────────────

pub fn health(client: &Client) -> Result<(), String> {
    let resp = client.get("/health")?;
    let status = resp.status();
    let json: Value = resp.json().map_err(|e| format!("parse response: {e}"))?;

    let s = json.get("status").and_then(|s| s.as_str()).unwrap_or("?");
    let adapters = json.get("adapters").and_then(|a| a.as_u64()).unwrap_or(0);
    let audit = json.get("audit").and_then(|a| a.as_str()).unwrap_or("?");
    if status.is_success() {
        println!("{} {} ({} adapters, audit {})", "●".green(), s.green().bold(), adapters, audit.dimmed());
        Ok(())
    } else {
        println!("{} {} ({} adapters, audit {})", "●".red(), s.red().bold(), adapters, audit);
        Err(format!("HTTP {}: gateway {s}", status.as_u16()))
    }
}
