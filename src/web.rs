use actix_web::cookie::{Cookie, SameSite};
use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::DashboardView;
use crate::data::{DashboardFilter, Dataset};
use crate::database::CredentialStore;
use crate::error::AppError;
use crate::model::{assess, Classifier, PredictionForm};
use crate::session::{SessionContext, SessionStore, SESSION_COOKIE};

const DASHBOARD_LOGIN: &str = "Please login to access the Dashboard.";
const PREDICTION_LOGIN: &str = "Please login to use the Prediction Tool.";
const INVALID_LOGIN: &str = "Invalid Username/Password";

/// Everything loaded once at startup and shared read-only by the workers.
pub struct AppState {
    pub store: CredentialStore,
    pub dataset: Arc<Dataset>,
    pub model: Option<Arc<dyn Classifier>>,
}

impl AppState {
    pub fn new(store: CredentialStore, dataset: Dataset, model: Option<Arc<dyn Classifier>>) -> Self {
        AppState {
            store,
            dataset: Arc::new(dataset),
            model,
        }
    }
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Warning,
    Info,
}

/// Inline message shown in the view that triggered it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    fn new(level: Level, message: impl Into<String>) -> Self {
        Notice {
            level,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct WhoAmI<'a> {
    logged_in: bool,
    username: Option<&'a str>,
    logged_in_at: Option<chrono::DateTime<chrono::Utc>>,
    prediction_available: bool,
}

async fn signup(
    state: web::Data<AppState>,
    web::Json(form): web::Json<Credentials>,
) -> Result<HttpResponse, AppError> {
    if form.username.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required.".to_string(),
        ));
    }

    if state.store.register(&form.username, &form.password).await? {
        info!(username = %form.username, "account created");
        Ok(HttpResponse::Created().json(Notice::new(
            Level::Success,
            "Account created! Please login.",
        )))
    } else {
        info!(username = %form.username, "signup rejected: username taken");
        Ok(HttpResponse::Conflict().json(Notice::new(Level::Warning, "User already exists.")))
    }
}

async fn login(
    state: web::Data<AppState>,
    sessions: web::Data<SessionStore>,
    web::Json(form): web::Json<Credentials>,
) -> Result<HttpResponse, AppError> {
    if !state.store.authenticate(&form.username, &form.password).await? {
        info!(username = %form.username, "login rejected");
        return Err(AppError::Unauthorized(INVALID_LOGIN));
    }

    let id = sessions.login(&form.username);
    info!(username = %form.username, "login accepted");

    let cookie = Cookie::build(SESSION_COOKIE, id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();
    Ok(HttpResponse::Ok().cookie(cookie).json(Notice::new(
        Level::Success,
        format!("Welcome back, {}!", form.username),
    )))
}

async fn logout(sessions: web::Data<SessionStore>, session: SessionContext) -> HttpResponse {
    if let Some(id) = session.id() {
        sessions.logout(&id);
        info!(username = session.username().unwrap_or_default(), "logged out");
    }

    let mut removal = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    removal.make_removal();
    HttpResponse::Ok()
        .cookie(removal)
        .json(Notice::new(Level::Info, "Logged out."))
}

async fn whoami(state: web::Data<AppState>, session: SessionContext) -> HttpResponse {
    HttpResponse::Ok().json(WhoAmI {
        logged_in: session.is_logged_in(),
        username: session.username(),
        logged_in_at: session.state().map(|s| s.logged_in_at),
        prediction_available: state.model.is_some(),
    })
}

async fn dashboard_filters(
    state: web::Data<AppState>,
    session: SessionContext,
) -> Result<HttpResponse, AppError> {
    session.require_login(DASHBOARD_LOGIN)?;
    Ok(HttpResponse::Ok().json(state.dataset.options()))
}

/// Dashboard with the initial selections (first three of each filter).
async fn dashboard_default(
    state: web::Data<AppState>,
    session: SessionContext,
) -> Result<HttpResponse, AppError> {
    session.require_login(DASHBOARD_LOGIN)?;
    let filter = state.dataset.options().default_filter();
    Ok(HttpResponse::Ok().json(DashboardView::build(&state.dataset, &filter)))
}

async fn dashboard(
    state: web::Data<AppState>,
    session: SessionContext,
    web::Json(filter): web::Json<DashboardFilter>,
) -> Result<HttpResponse, AppError> {
    session.require_login(DASHBOARD_LOGIN)?;
    Ok(HttpResponse::Ok().json(DashboardView::build(&state.dataset, &filter)))
}

async fn predict(
    state: web::Data<AppState>,
    session: SessionContext,
    web::Json(form): web::Json<PredictionForm>,
) -> Result<HttpResponse, AppError> {
    let username = session.require_login(PREDICTION_LOGIN)?;
    let model = state.model.as_ref().ok_or(AppError::ModelUnavailable)?;

    let features = form.to_features()?;
    let assessment = assess(model.as_ref(), &features).map_err(|e| {
        warn!(username, error = %e, "prediction failed");
        AppError::Prediction(e)
    })?;

    Ok(HttpResponse::Ok().json(assessment))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Student Dropout Dashboard is running!")
}

async fn serve_homepage() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(HOMEPAGE)
}

/// Malformed JSON bodies get the same error envelope as every other failure.
fn json_error(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    warn!(path = %req.path(), error = %err, "rejected request body");
    AppError::BadRequest(format!("Invalid request body: {err}")).into()
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/", web::get().to(serve_homepage))
        .route("/health", web::get().to(health_check))
        .service(
            web::scope("/auth")
                .route("/signup", web::post().to(signup))
                .route("/login", web::post().to(login))
                .route("/logout", web::post().to(logout))
                .route("/me", web::get().to(whoami)),
        )
        .service(
            web::resource("/dashboard")
                .route(web::get().to(dashboard_default))
                .route(web::post().to(dashboard)),
        )
        .route("/dashboard/filters", web::get().to(dashboard_filters))
        .route("/predict", web::post().to(predict));
}

const HOMEPAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Student Success AI</title>
    <style>
        body { font-family: sans-serif; margin: 0; display: flex; }
        nav { width: 220px; padding: 1rem; background: #f0f2f6; min-height: 100vh; }
        main { flex: 1; padding: 1.5rem; }
        .notice { padding: .6rem; margin: .5rem 0; border-radius: 4px; }
        .success { background: #d4edda; } .warning { background: #fff3cd; } .error { background: #f8d7da; }
        .info { background: #d1ecf1; }
        table { border-collapse: collapse; } td, th { border: 1px solid #ccc; padding: 4px 8px; }
        .hidden { display: none; }
    </style>
</head>
<body>
<nav>
    <h3>Navigation</h3>
    <label>Go to:
        <select id="menu">
            <option value="login">Home/Login</option>
            <option value="dashboard">Dashboard</option>
            <option value="predict">Prediction Tool</option>
        </select>
    </label>
    <div id="filters" class="hidden">
        <h4>Dashboard Filters</h4>
        <label>Select Course<select id="f-courses" multiple></select></label>
        <label>Select Nationality<select id="f-nationalities" multiple></select></label>
        <label>Select Previous Qualification<select id="f-qualifications" multiple></select></label>
        <button onclick="loadDashboard()">Apply</button>
    </div>
</nav>
<main>
    <div id="notice"></div>

    <section id="view-login">
        <h1>Student Dropout Prediction System</h1>
        <div id="who"></div>
        <div id="auth-forms">
            <h3>Login</h3>
            <input id="l-user" placeholder="Username"> <input id="l-pass" type="password" placeholder="Password">
            <button onclick="auth('login')">Login</button>
            <h3>Sign Up</h3>
            <input id="s-user" placeholder="New Username"> <input id="s-pass" type="password" placeholder="New Password">
            <button onclick="auth('signup')">Create Account</button>
        </div>
        <button id="logout" class="hidden" onclick="logout()">Logout</button>
    </section>

    <section id="view-dashboard" class="hidden">
        <h1>Interactive Analysis Dashboard</h1>
        <div id="dashboard"></div>
    </section>

    <section id="view-predict" class="hidden">
        <h1>Real-Time Dropout Predictor</h1>
        <label>Tuition Fees Up-to-Date? <select id="p-tuition"><option>Yes</option><option>No</option></select></label>
        <label>Is the Student a Debtor? <select id="p-debtor"><option>Yes</option><option>No</option></select></label>
        <label>Gender <select id="p-gender"><option>Male</option><option>Female</option></select></label>
        <label>Scholarship Holder? <select id="p-scholarship"><option>Yes</option><option>No</option></select></label>
        <label>Age at Enrollment <input id="p-age" type="number" min="17" max="70" value="20"></label>
        <label>2nd Sem Grade (0-20) <input id="p-grade" type="number" min="0" max="20" step="0.1" value="12.0"></label>
        <label>Approved Units (1st Sem) <input id="p-units" type="number" min="0" max="30" value="5"></label>
        <button onclick="predict()">Predict Outcome</button>
        <div id="prediction"></div>
    </section>
</main>
<script>
    const $ = (id) => document.getElementById(id);
    const ENTITIES = { '&': '&amp;', '<': '&lt;', '>': '&gt;', '"': '&quot;', "'": '&#39;' };
    const esc = (value) => String(value ?? '').replace(/[&<>"']/g, (ch) => ENTITIES[ch]);

    function notice(level, message) {
        const box = $('notice');
        box.replaceChildren();
        if (!message) return;
        const div = document.createElement('div');
        div.className = `notice ${esc(level)}`;
        div.textContent = message;
        box.appendChild(div);
    }

    async function call(method, url, body) {
        const res = await fetch(url, {
            method,
            headers: body ? { 'Content-Type': 'application/json' } : {},
            body: body ? JSON.stringify(body) : undefined,
        });
        const text = await res.text();
        let data = null;
        try { data = JSON.parse(text); } catch (_) { data = { message: text }; }
        return { ok: res.ok, data };
    }

    function report({ ok, data }) {
        if (data.error) notice('error', data.error.message);
        else if (data.message) notice(data.level || (ok ? 'success' : 'error'), data.message);
    }

    async function refreshWho() {
        const { data } = await call('GET', '/auth/me');
        $('who').innerHTML = data.logged_in ? `Logged in as: <b>${esc(data.username)}</b>` : 'Welcome! Please login to continue.';
        $('auth-forms').classList.toggle('hidden', data.logged_in);
        $('logout').classList.toggle('hidden', !data.logged_in);
    }

    async function auth(kind) {
        const prefix = kind === 'login' ? 'l' : 's';
        const res = await call('POST', `/auth/${kind}`, { username: $(`${prefix}-user`).value, password: $(`${prefix}-pass`).value });
        report(res);
        refreshWho();
    }

    async function logout() {
        report(await call('POST', '/auth/logout'));
        refreshWho();
    }

    function fillSelect(id, choices) {
        $(id).innerHTML = choices.values.map(v =>
            `<option value="${esc(v)}" ${choices.default.includes(v) ? 'selected' : ''}>${esc(v)}</option>`).join('');
    }

    function selectedOf(id) {
        return Array.from($(id).selectedOptions).map(o => o.value);
    }

    async function loadFilters() {
        const res = await call('GET', '/dashboard/filters');
        if (!res.ok) { report(res); return false; }
        fillSelect('f-courses', res.data.courses);
        fillSelect('f-nationalities', res.data.nationalities);
        fillSelect('f-qualifications', res.data.qualifications);
        return true;
    }

    function rateTable(title, rows, key) {
        return `<h4>${esc(title)}</h4><table><tr><th>${esc(key)}</th><th>Dropout Rate</th></tr>` +
            rows.map(r => `<tr><td>${esc(r.group ?? r.x)}</td><td>${(r.dropout_rate * 100).toFixed(1)}%</td></tr>`).join('') +
            '</table>';
    }

    async function loadDashboard() {
        const res = await call('POST', '/dashboard', {
            courses: selectedOf('f-courses'),
            nationalities: selectedOf('f-nationalities'),
            qualifications: selectedOf('f-qualifications'),
        });
        if (!res.ok) { report(res); return; }
        const d = res.data;
        if (d.status === 'empty') { $('dashboard').innerHTML = ''; notice('warning', d.warning); return; }
        notice();
        const c = d.correlation;
        $('dashboard').innerHTML =
            `<p>Total Students: <b>${esc(d.kpis.total_students)}</b> | Dropout Rate: <b>${esc(d.kpis.dropout_rate_label)}</b> | Avg 2nd Sem Grade: <b>${esc(d.kpis.average_grade_label ?? '-')}</b></p>` +
            '<h3>Correlation Heatmap</h3><table><tr><th></th>' + c.columns.map(x => `<th>${esc(x)}</th>`).join('') + '</tr>' +
            c.values.map((row, i) => `<tr><th>${esc(c.columns[i])}</th>` + row.map(v => `<td>${v === null ? '' : v.toFixed(2)}</td>`).join('') + '</tr>').join('') + '</table>' +
            '<h3>Parental Qualification Impact</h3>' +
            rateTable("Father's Qualification", d.father_qualification, 'Qualification') +
            rateTable("Mother's Qualification", d.mother_qualification, 'Qualification') +
            '<h3>Trend Analysis</h3>' +
            rateTable('Age Trend', d.age_trend, 'Age at Enrollment') +
            rateTable('Economic Trend', d.economic_trend, 'Unemployment Rate (%)') +
            (d.economic_trendline ? `<p>OLS trend: slope ${d.economic_trendline.slope.toFixed(4)}, intercept ${d.economic_trendline.intercept.toFixed(4)}</p>` : '');
    }

    async function predict() {
        const res = await call('POST', '/predict', {
            tuition_up_to_date: $('p-tuition').value,
            debtor: $('p-debtor').value,
            gender: $('p-gender').value,
            scholarship_holder: $('p-scholarship').value,
            age: parseInt($('p-age').value, 10),
            grade: parseFloat($('p-grade').value),
            approved_units: parseInt($('p-units').value, 10),
        });
        if (!res.ok) { report(res); $('prediction').innerHTML = ''; return; }
        notice();
        const level = res.data.outcome === 'dropout_risk' ? 'error' : 'success';
        $('prediction').innerHTML = `<div class="notice ${esc(level)}">Prediction: ${esc(res.data.label)}</div><p>Confidence Level: <b>${esc(res.data.confidence)}</b></p>`;
    }

    $('menu').addEventListener('change', async (e) => {
        const view = e.target.value;
        for (const v of ['login', 'dashboard', 'predict']) $(`view-${v}`).classList.toggle('hidden', v !== view);
        $('filters').classList.add('hidden');
        notice();
        if (view === 'dashboard' && await loadFilters()) {
            $('filters').classList.remove('hidden');
            loadDashboard();
        }
        if (view === 'login') refreshWho();
    });

    refreshWho();
</script>
</body>
</html>
"#;
