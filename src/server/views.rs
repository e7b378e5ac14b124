//! HTML pages rendered when a request ends without a redirect

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background-color: #0f1117;
            color: #e1e4e8;
        }
        .container {
            text-align: center;
            max-width: 480px;
            padding: 40px;
        }
        h1 {
            font-size: 24px;
            margin-bottom: 16px;
        }
        p {
            color: #8b949e;
            line-height: 1.6;
            margin-bottom: 24px;
        }
        a {
            color: #58a6ff;
            text-decoration: none;
            padding: 10px 24px;
            border: 1px solid #30363d;
            border-radius: 6px;
        }
        a:hover {
            background-color: #21262d;
            border-color: #58a6ff;
        }
        .error { color: #f85149; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="container">
{body}
    </div>
</body>
</html>"#
    )
}

pub fn landing() -> String {
    layout(
        "Sign in",
        r#"        <h1>Welcome</h1>
        <p>Sign in with your organization account to continue.</p>
        <a href="/auth/login">Sign in</a>"#,
    )
}

pub fn dashboard(subject: Option<&str>) -> String {
    let who = subject.map_or_else(|| "unknown user".to_string(), escape_html);
    layout(
        "Dashboard",
        &format!(
            r#"        <h1>Dashboard</h1>
        <p>Signed in as <code>{who}</code>.</p>
        <a href="/auth/logout">Sign out</a>"#
        ),
    )
}

/// `message` is escaped; `reason` must be a fixed identifier.
pub fn error(message: &str, reason: &str) -> String {
    layout(
        "Authentication Error",
        &format!(
            r#"        <h1 class="error">Authentication Failed</h1>
        <p>{}</p>
        <p><code>{}</code></p>
        <a href="/auth/login">Try Again</a>"#,
            escape_html(message),
            escape_html(reason)
        ),
    )
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x") & 'y'</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;) &amp; &#x27;y&#x27;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_dashboard_escapes_subject() {
        let html = dashboard(Some("<b>user</b>"));
        assert!(html.contains("&lt;b&gt;user&lt;/b&gt;"));
        assert!(!html.contains("<b>user"));
        assert!(dashboard(None).contains("unknown user"));
    }

    #[test]
    fn test_landing_links_to_login() {
        assert!(landing().contains(r#"href="/auth/login""#));
    }
}
