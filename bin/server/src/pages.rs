//! HTML pages served by the proxy itself.
//!
//! Pages are Leptos components rendered to static HTML on the server; no
//! client-side hydration is involved. Text and attribute values are escaped
//! by the renderer.

use axum::http::StatusCode;
use leptos::prelude::*;

const STYLE: &str = "body{font-family:sans-serif;background:#f0f0f0;margin:0}\
.box{max-width:24em;margin:4em auto;padding:2em;background:#fff;border-radius:4px}\
.box h1{font-size:1.4em}\
.box input{display:block;width:100%;margin:.4em 0;box-sizing:border-box}\
.box hr{margin:1.5em 0}\
footer{text-align:center;color:#888;font-size:.8em}";

/// Everything the sign-in page needs to know.
#[derive(Debug, Clone)]
pub struct SignInView {
    /// Provider name shown on the button.
    pub provider_name: String,
    /// Proxy endpoint prefix, e.g. `/oauth`.
    pub proxy_prefix: String,
    /// Where to send the user after sign-in.
    pub redirect: String,
    /// Whether to show the username/password form.
    pub show_htpasswd_form: bool,
    /// Whether the last form submission was rejected.
    pub failed: bool,
    /// Hint naming the email domains that may sign in.
    pub sign_in_message: Option<String>,
    /// Footer text; no footer when unset.
    pub footer: Option<String>,
}

/// Renders the sign-in page.
pub fn sign_in_page(page: SignInView) -> String {
    view! { <SignInPage page=page/> }.to_html()
}

/// Renders an error page for the given status.
pub fn error_page(status: StatusCode, title: &str, message: &str) -> String {
    view! {
        <ErrorPage
            status=status.as_u16()
            title=title.to_string()
            message=message.to_string()
        />
    }
    .to_html()
}

/// Sign-in page with a provider button and an optional htpasswd form.
#[component]
fn SignInPage(page: SignInView) -> impl IntoView {
    let start_url = format!("{}/start", page.proxy_prefix);
    let sign_in_url = format!("{}/sign_in", page.proxy_prefix);
    let button_label = format!("Sign in with {}", page.provider_name);
    let redirect = page.redirect.clone();
    let form_redirect = page.redirect;

    let htpasswd_form = page.show_htpasswd_form.then(move || {
        view! {
            <hr/>
            <form method="POST" action=sign_in_url>
                <input type="hidden" name="rd" value=form_redirect/>
                <label for="username">"Username:"</label>
                <input type="text" name="username" id="username" autocomplete="username"/>
                <label for="password">"Password:"</label>
                <input type="password" name="password" id="password" autocomplete="current-password"/>
                <button type="submit">"Sign In"</button>
            </form>
        }
    });

    let failure = page
        .failed
        .then(|| view! { <p class="error">"Invalid username or password."</p> });
    let message = page.sign_in_message.map(|message| view! { <p class="message">{message}</p> });
    let footer = page.footer.map(|text| view! { <footer>{text}</footer> });

    view! {
        <!DOCTYPE html>
        <html lang="en">
            <head>
                <meta charset="utf-8"/>
                <meta name="viewport" content="width=device-width, initial-scale=1"/>
                <title>"Sign In"</title>
                <style>{STYLE}</style>
            </head>
            <body>
                <div class="box">
                    <h1>"Sign in"</h1>
                    {failure}
                    {message}
                    <form method="GET" action=start_url>
                        <input type="hidden" name="rd" value=redirect/>
                        <button type="submit">{button_label}</button>
                    </form>
                    {htpasswd_form}
                </div>
                {footer}
            </body>
        </html>
    }
}

/// Generic error page.
#[component]
fn ErrorPage(status: u16, title: String, message: String) -> impl IntoView {
    let heading = format!("{status} {title}");

    view! {
        <!DOCTYPE html>
        <html lang="en">
            <head>
                <meta charset="utf-8"/>
                <title>{heading.clone()}</title>
                <style>{STYLE}</style>
            </head>
            <body>
                <div class="box">
                    <h1>{heading}</h1>
                    <p>{message}</p>
                    <p><a href="/">"Home"</a></p>
                </div>
            </body>
        </html>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_in(show_htpasswd_form: bool) -> SignInView {
        SignInView {
            provider_name: "OpenShift".to_string(),
            proxy_prefix: "/oauth".to_string(),
            redirect: "/app?x=1".to_string(),
            show_htpasswd_form,
            failed: false,
            sign_in_message: None,
            footer: None,
        }
    }

    #[test]
    fn sign_in_page_links_to_start() {
        let html = sign_in_page(sign_in(false));
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("action=\"/oauth/start\""));
        assert!(html.contains("Sign in with OpenShift"));
        assert!(!html.contains("type=\"password\""));
    }

    #[test]
    fn sign_in_page_shows_htpasswd_form() {
        let html = sign_in_page(sign_in(true));
        assert!(html.contains("action=\"/oauth/sign_in\""));
        assert!(html.contains("type=\"password\""));
    }

    #[test]
    fn sign_in_page_escapes_redirect() {
        let mut page = sign_in(false);
        page.redirect = "/\"><script>alert(1)</script>".to_string();
        let html = sign_in_page(page);
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn sign_in_message_and_footer_are_optional() {
        let html = sign_in_page(sign_in(false));
        assert!(!html.contains("<footer"));
        assert!(!html.contains("Authenticate using"));

        let mut page = sign_in(false);
        page.sign_in_message = Some("Authenticate using corp.io".to_string());
        page.footer = Some("Ops <team>".to_string());
        let html = sign_in_page(page);
        assert!(html.contains("Authenticate using corp.io"));
        assert!(html.contains("<footer"));
        assert!(html.contains("Ops &lt;team&gt;"));
    }

    #[test]
    fn error_page_shows_status() {
        let html = error_page(StatusCode::FORBIDDEN, "Permission denied", "Nope.");
        assert!(html.contains("403 Permission denied"));
        assert!(html.contains("Nope."));
    }
}
