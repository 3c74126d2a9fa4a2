use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use student_dropout::data::Dataset;
use student_dropout::error::ModelError;
use student_dropout::model::{Classifier, FeatureVector};
use student_dropout::session::{SessionStore, SESSION_COOKIE};
use student_dropout::web::{routes, AppState};
use student_dropout::CredentialStore;

const STUDENTS: &str = "\
Course Name,Nationality,Previous Qualification,Father's Qualification,Mother's Qualification,Tuition Fees Up-to-Date,Scholarship Holder,Age at Enrollment,Average Grade (2nd Sem),Unemployment Rate (%),Student Status
Informatics,Portuguese,Secondary,Basic,Higher,Yes,No,19,13.0,10.8,Graduate
Informatics,Portuguese,Secondary,Basic,Basic,No,No,24,9.0,13.9,Dropout
Nursing,Portuguese,Secondary,Higher,Higher,Yes,Yes,18,14.0,10.8,Graduate
Nursing,Brazilian,Technical,Basic,Basic,Yes,No,20,12.0,7.6,Dropout
";

/// Always answers class 1 with probability 0.87.
struct StubClassifier;

impl Classifier for StubClassifier {
    fn predict(&self, _: &FeatureVector) -> Result<u8, ModelError> {
        Ok(1)
    }

    fn predict_proba(&self, _: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        Ok(vec![0.13, 0.87])
    }
}

struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn predict(&self, _: &FeatureVector) -> Result<u8, ModelError> {
        Err(ModelError::Prediction("feature vector rejected".to_string()))
    }

    fn predict_proba(&self, _: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::Prediction("feature vector rejected".to_string()))
    }
}

async fn app_state(dir: &TempDir, model: Option<Arc<dyn Classifier>>) -> AppState {
    let url = format!("sqlite://{}", dir.path().join("users.db").display());
    let store = CredentialStore::connect(&url).await.expect("connect");
    store.initialize().await.expect("initialize");
    let dataset = Dataset::from_reader(STUDENTS.as_bytes()).expect("dataset");
    AppState::new(store, dataset, model)
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .app_data(web::Data::new(SessionStore::new()))
                .configure(routes),
        )
        .await
    };
}

fn credentials(username: &str, password: &str) -> Value {
    json!({ "username": username, "password": password })
}

fn session_cookie<B>(resp: &ServiceResponse<B>) -> Cookie<'static> {
    resp.response()
        .cookies()
        .find(|c| c.name() == SESSION_COOKIE)
        .expect("session cookie")
        .into_owned()
}

fn prediction_form() -> Value {
    json!({
        "tuition_up_to_date": "Yes",
        "debtor": "No",
        "gender": "Male",
        "scholarship_holder": "No",
        "age": 20,
        "grade": 12.0,
        "approved_units": 5
    })
}

macro_rules! signup_and_login {
    ($app:expr, $user:expr, $pass:expr) => {{
        let req = test::TestRequest::post()
            .uri("/auth/signup")
            .set_json(credentials($user, $pass))
            .to_request();
        assert_eq!(test::call_service(&$app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials($user, $pass))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        session_cookie(&resp)
    }};
}

#[actix_web::test]
async fn health_and_homepage_are_public() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    assert!(std::str::from_utf8(&body).unwrap().contains("Prediction Tool"));
}

#[actix_web::test]
async fn signup_login_and_duplicate_flow() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(credentials("alice", "secret123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Account created! Please login.");

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(credentials("alice", "other"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["level"], "warning");
    assert_eq!(body["message"], "User already exists.");

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(credentials("alice", "secret123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Welcome back, alice!");

    let req = test::TestRequest::get().uri("/auth/me").cookie(cookie).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["logged_in"], true);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["prediction_available"], false);
}

#[actix_web::test]
async fn wrong_password_and_unknown_user_look_the_same() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);
    let _ = signup_and_login!(app, "alice", "secret123");

    let mut bodies = Vec::new();
    for (user, pass) in [("alice", "wrong"), ("mallory", "secret123")] {
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(credentials(user, pass))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        bodies.push(body);
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[0]["error"]["message"], "Invalid Username/Password");
}

#[actix_web::test]
async fn empty_credentials_are_rejected() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(credentials("", "pw"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn protected_views_require_login() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, Some(Arc::new(StubClassifier))).await);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/dashboard").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Please login to access the Dashboard.");

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(prediction_form())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Please login to use the Prediction Tool.");
}

#[actix_web::test]
async fn logout_ends_the_session() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let req = test::TestRequest::post()
        .uri("/auth/logout")
        .cookie(cookie.clone())
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::get().uri("/dashboard").cookie(cookie).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn dashboard_filters_and_kpis() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let req = test::TestRequest::get()
        .uri("/dashboard/filters")
        .cookie(cookie.clone())
        .to_request();
    let options: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(options["courses"]["values"], json!(["Informatics", "Nursing"]));

    let req = test::TestRequest::post()
        .uri("/dashboard")
        .cookie(cookie.clone())
        .set_json(json!({ "courses": ["Informatics"] }))
        .to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["status"], "ready");
    assert_eq!(view["kpis"]["total_students"], 2);
    assert_eq!(view["kpis"]["dropout_rate_label"], "50.0%");
    assert_eq!(view["kpis"]["average_grade_label"], "11.0");
    assert_eq!(view["father_qualification"][0]["group"], "Basic");
    assert_eq!(view["age_trend"].as_array().unwrap().len(), 2);
    assert!(view["correlation"]["columns"]
        .as_array()
        .unwrap()
        .contains(&json!("Unemployment Rate (%)")));

    let req = test::TestRequest::post()
        .uri("/dashboard")
        .cookie(cookie)
        .set_json(json!({ "courses": ["Law"] }))
        .to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["status"], "empty");
    assert_eq!(view["warning"], "No data matches your filters.");
}

#[actix_web::test]
async fn stub_model_prediction_reports_dropout_risk() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, Some(Arc::new(StubClassifier))).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let req = test::TestRequest::post()
        .uri("/predict")
        .cookie(cookie)
        .set_json(prediction_form())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["outcome"], "dropout_risk");
    assert_eq!(body["label"], "Dropout Risk");
    assert_eq!(body["confidence"], "87.0%");
}

#[actix_web::test]
async fn missing_model_disables_prediction_only() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, None).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let req = test::TestRequest::post()
        .uri("/predict")
        .cookie(cookie.clone())
        .set_json(prediction_form())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Model file not found.");

    let req = test::TestRequest::get().uri("/dashboard").cookie(cookie).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());
}

#[actix_web::test]
async fn prediction_failures_are_reported_inline() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, Some(Arc::new(FailingClassifier))).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let req = test::TestRequest::post()
        .uri("/predict")
        .cookie(cookie.clone())
        .set_json(prediction_form())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Prediction Error: feature vector rejected");

    let mut out_of_range = prediction_form();
    out_of_range["age"] = json!(90);
    let req = test::TestRequest::post()
        .uri("/predict")
        .cookie(cookie)
        .set_json(out_of_range)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn malformed_bodies_use_the_error_envelope() {
    let dir = TempDir::new().unwrap();
    let app = init_app!(app_state(&dir, Some(Arc::new(StubClassifier))).await);
    let cookie = signup_and_login!(app, "alice", "secret123");

    let mut form = prediction_form();
    form["gender"] = json!("X");
    let req = test::TestRequest::post()
        .uri("/predict")
        .cookie(cookie)
        .set_json(form)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));

    let req = test::TestRequest::post()
        .uri("/auth/signup")
        .set_json(json!({ "username": "bob" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
