//! Server-rendered HTML for the login, patient picker, and consent steps.

const STYLE: &str = r##"
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
         background: #f5f5f5; color: #333; line-height: 1.6; display: flex;
         align-items: center; justify-content: center; min-height: 100vh; }
  .card { background: #fff; border-radius: 8px; padding: 32px; width: 360px;
          box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
  .card h1 { font-size: 18px; margin-bottom: 4px; }
  .card .sub { color: #95a5a6; font-size: 13px; margin-bottom: 20px; }
  label { display: block; font-size: 13px; color: #555; margin-bottom: 4px; margin-top: 12px; }
  input[type=text], input[type=password] {
      width: 100%; padding: 8px 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; }
  .scope-list { list-style: none; margin: 8px 0 16px; }
  .scope-list li { padding: 4px 0; font-size: 13px; }
  .patient-list { list-style: none; margin: 8px 0 16px; max-height: 280px; overflow-y: auto; }
  .patient-list li { padding: 6px 0; font-size: 14px; }
  .actions { display: flex; gap: 8px; margin-top: 16px; }
  button { flex: 1; padding: 10px; border: none; border-radius: 4px; font-size: 14px;
           cursor: pointer; font-weight: 600; }
  .primary { background: #2c3e50; color: #fff; }
  .secondary { background: #ecf0f1; color: #555; }
  .error { color: #c0392b; font-size: 13px; margin-bottom: 12px; }
</style>
"##;

pub fn login_page(error: Option<&str>) -> String {
    let error_html = error
        .map(|e| format!(r#"<div class="error">{}</div>"#, html_escape(e)))
        .unwrap_or_default();

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Sign in</title>{STYLE}</head>
<body>
<div class="card">
  <h1>Sign in</h1>
  <div class="sub">Authorize access to your health record</div>
  {error_html}
  <form method="post" action="/oauth2/login">
    <label for="username">Username</label>
    <input type="text" id="username" name="username" autocomplete="username" required>
    <label for="password">Password</label>
    <input type="password" id="password" name="password" autocomplete="current-password" required>
    <div class="actions">
      <button class="primary" type="submit">Sign in</button>
    </div>
  </form>
</div>
</body>
</html>"##
    )
}

pub fn patient_picker_page(patients: &[(String, String)]) -> String {
    let options: String = patients
        .iter()
        .map(|(id, display)| {
            format!(
                r#"<li><label><input type="radio" name="patient_id" value="{}" required> {}</label></li>"#,
                html_escape(id),
                html_escape(display)
            )
        })
        .collect();

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Select patient</title>{STYLE}</head>
<body>
<div class="card">
  <h1>Select a patient</h1>
  <div class="sub">Choose the patient context for this app</div>
  <form method="post" action="/patient-picker">
    <ul class="patient-list">{options}</ul>
    <div class="actions">
      <button class="primary" type="submit" name="action" value="select">Continue</button>
      <button class="secondary" type="submit" name="action" value="cancel">Cancel</button>
    </div>
  </form>
</div>
</body>
</html>"##
    )
}

pub fn consent_page(client_id: &str, scopes: &[String]) -> String {
    let scope_items: String = scopes
        .iter()
        .map(|s| {
            format!(
                r#"<li><label><input type="checkbox" name="scope" value="{0}" checked> {0}</label></li>"#,
                html_escape(s)
            )
        })
        .collect();

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Authorize application</title>{STYLE}</head>
<body>
<div class="card">
  <h1>Authorize access</h1>
  <div class="sub"><strong>{}</strong> is requesting:</div>
  <form method="post" action="/consent">
    <ul class="scope-list">{scope_items}</ul>
    <div class="actions">
      <button class="primary" type="submit" name="decision" value="allow">Allow</button>
      <button class="secondary" type="submit" name="decision" value="deny">Deny</button>
    </div>
  </form>
</div>
</body>
</html>"##,
        html_escape(client_id)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_page_renders_form() {
        let html = login_page(None);
        assert!(html.contains("action=\"/oauth2/login\""));
        assert!(!html.contains("error"));
    }

    #[test]
    fn test_login_page_with_error() {
        let html = login_page(Some("bad credentials"));
        assert!(html.contains("bad credentials"));
    }

    #[test]
    fn test_patient_picker_lists_patients() {
        let html = patient_picker_page(&[("example".to_string(), "Example Patient".to_string())]);
        assert!(html.contains("value=\"example\""));
        assert!(html.contains("Example Patient"));
    }

    #[test]
    fn test_consent_page_lists_scopes() {
        let html = consent_page("smart-sample-app", &["launch/patient".to_string(), "openid".to_string()]);
        assert!(html.contains("smart-sample-app"));
        assert!(html.contains("launch/patient"));
        assert!(html.contains("openid"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
    }
}
