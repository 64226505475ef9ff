//! Account route handlers.
//!
//! Password login and registration, profiles with avatar upload, and a few
//! small cookie and session demo endpoints.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form, Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tower_sessions::cookie::{Cookie, time};
use tracing::instrument;

use mysite_core::UserId;

use crate::authz::{Check, authorize, perms};
use crate::error::{AppError, LOGIN_URL, Result, clear_sentry_user, set_sentry_user};
use crate::forms::{FormErrors, LoginForm, RegisterForm, safe_next};
use crate::middleware::{OptionalAuth, clear_current_user, set_current_user};
use crate::models::{CurrentUser, Profile, User, session_keys};
use crate::services::auth::{AuthError, AuthService};
use crate::state::AppState;

/// Where login and registration land when no `next` is given.
const ABOUT_ME_URL: &str = "/accounts/about-me/";

// =============================================================================
// Templates
// =============================================================================

/// Login page template.
#[derive(Template, WebTemplate)]
#[template(path = "accounts/login.html")]
pub struct LoginTemplate {
    pub errors: FormErrors,
    pub next: String,
    pub username: String,
}

/// Registration page template.
#[derive(Template, WebTemplate)]
#[template(path = "accounts/register.html")]
pub struct RegisterTemplate {
    pub username: String,
    pub errors: FormErrors,
}

/// Own profile page template.
#[derive(Template, WebTemplate)]
#[template(path = "accounts/about_me.html")]
pub struct AboutMeTemplate {
    pub user: Option<User>,
    pub profile: Option<Profile>,
}

/// User list template.
#[derive(Template, WebTemplate)]
#[template(path = "accounts/users_list.html")]
pub struct UsersListTemplate {
    pub users: Vec<User>,
}

/// Someone's profile page template.
#[derive(Template, WebTemplate)]
#[template(path = "accounts/user_details.html")]
pub struct UserDetailsTemplate {
    pub owner: User,
    pub profile: Option<Profile>,
    pub can_edit: bool,
}

/// Query parameters of the login page.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

// =============================================================================
// Login / logout / register
// =============================================================================

/// Display the login page.
pub async fn login_page(Query(query): Query<LoginQuery>) -> impl IntoResponse {
    LoginTemplate {
        errors: FormErrors::new(),
        next: query.next.unwrap_or_default(),
        username: String::new(),
    }
}

/// Handle the login form.
#[instrument(skip(state, session, form), fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let auth = AuthService::new(state.repos().users.as_ref());

    match auth.login(&form.username, &form.password).await {
        Ok(user) => {
            let current = CurrentUser::from(&user);
            set_current_user(&session, &current).await?;
            set_sentry_user(&user.id, Some(user.username.as_str()));
            tracing::info!(user_id = %user.id, "User logged in");

            let target = safe_next(form.next.as_deref(), ABOUT_ME_URL);
            Ok(Redirect::to(&target).into_response())
        }
        Err(AuthError::InvalidCredentials) => {
            tracing::info!("Login failed");
            let template = LoginTemplate {
                errors: FormErrors::single(
                    FormErrors::NON_FIELD,
                    "Please enter a correct username and password.",
                ),
                next: form.next.unwrap_or_default(),
                username: form.username,
            };
            Ok((StatusCode::BAD_REQUEST, template).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// Handle logout.
#[instrument(skip(session))]
pub async fn logout(session: Session) -> Result<Response> {
    clear_current_user(&session).await?;
    clear_sentry_user();
    tracing::info!("User logged out");
    Ok(Redirect::to(LOGIN_URL).into_response())
}

/// Display the registration page.
pub async fn register_page() -> impl IntoResponse {
    RegisterTemplate {
        username: String::new(),
        errors: FormErrors::new(),
    }
}

/// Handle registration: create the user with its profile, then log in.
#[instrument(skip(state, session, form), fields(username = %form.username))]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Result<Response> {
    let auth = AuthService::new(state.repos().users.as_ref());

    let errors = match auth
        .register(&form.username, &form.password1, &form.password2)
        .await
    {
        Ok((user, _profile)) => {
            set_current_user(&session, &CurrentUser::from(&user)).await?;
            set_sentry_user(&user.id, Some(user.username.as_str()));
            tracing::info!(user_id = %user.id, "User registered");
            return Ok(Redirect::to(ABOUT_ME_URL).into_response());
        }
        Err(AuthError::InvalidUsername(e)) => FormErrors::single("username", e.to_string()),
        Err(AuthError::UserAlreadyExists) => {
            FormErrors::single("username", "A user with that username already exists.")
        }
        Err(AuthError::PasswordMismatch) => {
            FormErrors::single("password2", "The two password fields didn't match.")
        }
        Err(AuthError::WeakPassword(message)) => FormErrors::single("password1", message),
        Err(e) => return Err(e.into()),
    };

    let template = RegisterTemplate {
        username: form.username,
        errors,
    };
    Ok((StatusCode::BAD_REQUEST, template).into_response())
}

// =============================================================================
// Profiles
// =============================================================================

/// Read the `avatar` file from a multipart body.
async fn read_avatar(multipart: &mut Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() == Some("avatar") {
            let filename = field.file_name().unwrap_or("avatar").to_owned();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return Ok((filename, data.to_vec()));
        }
    }
    Err(AppError::BadRequest("No avatar was submitted".to_string()))
}

async fn store_avatar(state: &AppState, user_id: UserId, multipart: &mut Multipart) -> Result<()> {
    let (filename, data) = read_avatar(multipart).await?;
    let path = state.media().save_avatar(user_id, &filename, &data).await?;
    state.repos().users.set_avatar(user_id, &path).await?;
    tracing::info!(user_id = %user_id, "Avatar updated");
    Ok(())
}

/// Display the current user, or an anonymous notice.
#[instrument(skip(state, user))]
pub async fn about_me(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
) -> Result<impl IntoResponse> {
    let Some(current) = user else {
        return Ok(AboutMeTemplate {
            user: None,
            profile: None,
        });
    };

    let user = state.repos().users.get(current.id).await?;
    let profile = state.repos().users.profile(current.id).await?;
    Ok(AboutMeTemplate { user, profile })
}

/// Replace the current user's avatar.
#[instrument(skip(state, user, multipart))]
pub async fn update_about_me(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Response> {
    let user = authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    store_avatar(&state, user.id, &mut multipart).await?;
    Ok(Redirect::to(ABOUT_ME_URL).into_response())
}

/// Display every user.
#[instrument(skip(state))]
pub async fn users_list(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let users = state.repos().users.list().await?;
    Ok(UsersListTemplate { users })
}

async fn load_user(state: &AppState, id: UserId) -> Result<User> {
    state
        .repos()
        .users
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))
}

/// Staff may edit anyone; everybody else only themselves.
fn can_edit(user: Option<&CurrentUser>, owner: UserId) -> bool {
    user.is_some_and(|u| u.is_staff || u.id == owner)
}

/// Display one user with their profile.
#[instrument(skip(state, user))]
pub async fn user_details(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse> {
    let owner = load_user(&state, id).await?;
    let profile = state.repos().users.profile(id).await?;
    Ok(UserDetailsTemplate {
        can_edit: can_edit(user.as_ref(), owner.id),
        owner,
        profile,
    })
}

/// Replace another user's avatar. Staff or the user themselves.
#[instrument(skip(state, user, multipart))]
pub async fn update_user_avatar(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<UserId>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Response> {
    let current = authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    let owner = load_user(&state, id).await?;
    if !can_edit(Some(&current), owner.id) {
        return Err(AppError::Forbidden(
            "You can only change your own avatar.".to_string(),
        ));
    }
    store_avatar(&state, owner.id, &mut multipart).await?;
    Ok(Redirect::to(&format!("/accounts/users/{id}/")).into_response())
}

// =============================================================================
// Cookie and session demos
// =============================================================================

/// Value of the named cookie in the request's `Cookie` headers.
fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(std::result::Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_owned())
}

/// Set `fizz=buzz` for an hour. Superusers only.
#[instrument(skip(state, user))]
pub async fn set_cookie(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Superuser],
        uri.path(),
    )
    .await?;

    let cookie = Cookie::build(("fizz", "buzz"))
        .path("/")
        .max_age(time::Duration::hours(1))
        .build();
    Ok(([(header::SET_COOKIE, cookie.to_string())], "Cookie set").into_response())
}

/// Echo the `fizz` cookie with a random suffix, so page caching is visible.
pub async fn get_cookie(headers: HeaderMap) -> String {
    let value = request_cookie(&headers, "fizz").unwrap_or_else(|| "default value".to_string());
    format!("Cookie value: '{value}' + {}", rand::random::<f64>())
}

/// Store `foobar = spameggs` in the session.
///
/// Anonymous callers get a 403 here rather than a login redirect.
#[instrument(skip(state, user, session))]
pub async fn set_session(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    session: Session,
    uri: Uri,
) -> Result<Response> {
    if user.is_none() {
        return Err(AppError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ));
    }
    authorize(
        &state,
        user.as_ref(),
        &[Check::Permission(perms::VIEW_PROFILE)],
        uri.path(),
    )
    .await?;

    session.insert(session_keys::FOOBAR, "spameggs").await?;
    Ok("Session set!".into_response())
}

/// Read `foobar` back from the session.
#[instrument(skip(state, user, session))]
pub async fn get_session(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    session: Session,
    uri: Uri,
) -> Result<String> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    let value = session
        .get::<String>(session_keys::FOOBAR)
        .await?
        .unwrap_or_else(|| "default".to_string());
    Ok(format!("Session value: '{value}'"))
}

/// Static JSON payload.
pub async fn foo_bar() -> Json<serde_json::Value> {
    Json(serde_json::json!({"foo": "bar", "spam": "eggs"}))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_request_cookie_finds_value_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("mysite_session=abc; fizz=buzz"),
        );
        assert_eq!(request_cookie(&headers, "fizz").as_deref(), Some("buzz"));
        assert_eq!(request_cookie(&headers, "other"), None);
    }

    #[tokio::test]
    async fn test_get_cookie_strips_quotes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("fizz=\"buzz\"; other=1"),
        );
        let body = get_cookie(headers).await;
        assert!(body.starts_with("Cookie value: 'buzz' + "), "{body}");
    }

    #[tokio::test]
    async fn test_get_cookie_defaults() {
        let body = get_cookie(HeaderMap::new()).await;
        assert!(body.starts_with("Cookie value: 'default value' + "));
    }

    #[test]
    fn test_can_edit() {
        let user = CurrentUser {
            id: UserId::new(1),
            username: "alice".parse().unwrap(),
            is_staff: false,
            is_superuser: false,
        };
        assert!(can_edit(Some(&user), UserId::new(1)));
        assert!(!can_edit(Some(&user), UserId::new(2)));
        assert!(!can_edit(None, UserId::new(1)));
        let staff = CurrentUser {
            is_staff: true,
            ..user
        };
        assert!(can_edit(Some(&staff), UserId::new(2)));
    }
}
