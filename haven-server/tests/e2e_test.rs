//! End-to-end integration test
//!
//! Tests the full FHIR CRUD + Search flow:
//! POST (create) -> GET (read) -> GET (search) -> PUT (update) -> DELETE

use haven_core::validation::{ProfileRegistry, TerminologyRegistry};
use haven_core::{CompartmentDef, SearchParamRegistry};
use haven_server::{build_router, config::ServerConfig, oauth::OAuthState, AppState};
use haven_store::{AuditLog, OAuthStore, SearchIndex, SqliteStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Start a test server on a random port, returns (base_url, _temp_dir)
async fn start_test_server() -> (String, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let store = SqliteStore::open(temp_dir.path().join("resources.sqlite")).unwrap();
    let index = SearchIndex::open(temp_dir.path().join("search_index.sqlite")).unwrap();
    let audit = AuditLog::open(temp_dir.path().join("audit.sqlite")).unwrap();
    let oauth_store = OAuthStore::open(temp_dir.path().join("oauth.sqlite")).unwrap();
    let oauth = OAuthState::new(oauth_store).unwrap();

    let state = Arc::new(AppState {
        store,
        index: Mutex::new(index),
        audit: Arc::new(Mutex::new(audit)),
        config: ServerConfig::default(),
        profile_registry: ProfileRegistry::new(),
        terminology_registry: TerminologyRegistry::new(),
        search_param_registry: SearchParamRegistry::new(),
        compartment_def: CompartmentDef::patient_compartment(),
        jwk_cache: tokio::sync::RwLock::new(haven_server::auth::JwkCache::new()),
        oauth,
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), temp_dir)
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["fhirVersion"], "4.0.1");
}

#[tokio::test]
async fn test_metadata() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/fhir/metadata", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "CapabilityStatement");
    assert_eq!(body["fhirVersion"], "4.0.1");
}

#[tokio::test]
async fn test_patient_crud_and_search() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // 1. POST /Patient — Create
    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "Doe", "given": ["Jane"]}],
        "gender": "female"
    });

    let resp = client
        .post(format!("{}/fhir/Patient", base_url))
        .header("Content-Type", "application/fhir+json")
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "POST should return 201 Created");

    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().expect("Created resource should have id");
    assert_eq!(created["resourceType"], "Patient");
    assert_eq!(created["name"][0]["family"], "Doe");
    assert_eq!(created["meta"]["versionId"], "1");

    // 2. GET /Patient/{id} — Read
    let resp = client
        .get(format!("{}/fhir/Patient/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "GET should return 200 OK");

    let read: Value = resp.json().await.unwrap();
    assert_eq!(read["id"], id);
    assert_eq!(read["name"][0]["family"], "Doe");
    assert_eq!(read["name"][0]["given"][0], "Jane");

    // 3. GET /Patient?family=Doe — Search
    let resp = client
        .get(format!("{}/fhir/Patient?family=Doe", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Search should return 200 OK");

    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "searchset");
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], id);

    // 4. PUT /Patient/{id} — Update
    let updated_patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "Doe", "given": ["Jane", "M"]}],
        "gender": "female"
    });

    let resp = client
        .put(format!("{}/fhir/Patient/{}", base_url, id))
        .header("Content-Type", "application/fhir+json")
        .json(&updated_patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "PUT should return 200 OK");

    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["meta"]["versionId"], "2");
    assert_eq!(updated["name"][0]["given"][1], "M");

    // 5. GET /Patient/{id}/_history — History
    let resp = client
        .get(format!("{}/fhir/Patient/{}/_history", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "History should return 200 OK");

    let history: Value = resp.json().await.unwrap();
    assert_eq!(history["resourceType"], "Bundle");
    assert_eq!(history["type"], "history");
    assert!(history["total"].as_u64().unwrap() >= 1);

    // 6. DELETE /Patient/{id}
    let resp = client
        .delete(format!("{}/fhir/Patient/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204, "DELETE should return 204 No Content");

    // 7. Verify deleted — GET should return 404
    let resp = client
        .get(format!("{}/fhir/Patient/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404, "GET after DELETE should return 404");
}

#[tokio::test]
async fn test_observation_create_and_search() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Create an Observation
    let observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {
            "coding": [{
                "system": "http://loinc.org",
                "code": "85354-9",
                "display": "Blood pressure"
            }]
        },
        "subject": {
            "reference": "Patient/test-123"
        },
        "valueQuantity": {
            "value": 120,
            "unit": "mmHg"
        }
    });

    let resp = client
        .post(format!("{}/fhir/Observation", base_url))
        .json(&observation)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap();

    // Search by code
    let resp = client
        .get(format!("{}/fhir/Observation?code=85354-9", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], id);
}

#[tokio::test]
async fn test_resource_not_found() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/fhir/Patient/nonexistent-id", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "OperationOutcome");
}

#[tokio::test]
async fn test_invalid_resource_rejected() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Missing resourceType
    let invalid = json!({
        "name": [{"family": "Test"}]
    });

    let resp = client
        .post(format!("{}/fhir/Patient", base_url))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_bundle_transaction() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "fullUrl": "urn:uuid:patient-1",
                "resource": {
                    "resourceType": "Patient",
                    "name": [{"family": "Smith"}],
                    "gender": "female"
                },
                "request": {
                    "method": "POST",
                    "url": "Patient"
                }
            },
            {
                "fullUrl": "urn:uuid:obs-1",
                "resource": {
                    "resourceType": "Observation",
                    "status": "final",
                    "code": {"coding": [{"system": "http://loinc.org", "code": "29463-7"}]},
                    "subject": {"reference": "urn:uuid:patient-1"}
                },
                "request": {
                    "method": "POST",
                    "url": "Observation"
                }
            }
        ]
    });

    let resp = client
        .post(&format!("{}/fhir", base_url))
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let result: Value = resp.json().await.unwrap();
    assert_eq!(result["resourceType"], "Bundle");
    assert_eq!(result["type"], "transaction-response");

    let entries = result["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 2);

    // First entry should be 201 Created
    assert!(entries[0]["response"]["status"].as_str().unwrap().contains("201"));
    // Second entry should be 201 Created
    assert!(entries[1]["response"]["status"].as_str().unwrap().contains("201"));

    // "Patient/<id>/_history/1" -> "<id>"
    fn id_from_location(location: &str) -> &str {
        location.split('/').nth(1).unwrap()
    }

    let patient_location = entries[0]["response"]["location"].as_str().unwrap();
    let patient_id = id_from_location(patient_location);
    let obs_location = entries[1]["response"]["location"].as_str().unwrap();
    let obs_id = id_from_location(obs_location);

    // The observation's subject reference must have been rewritten from the
    // urn:uuid placeholder to the patient's real assigned id.
    let obs_resp = client
        .get(format!("{}/fhir/Observation/{}", base_url, obs_id))
        .send()
        .await
        .unwrap();
    assert_eq!(obs_resp.status(), 200);
    let obs: Value = obs_resp.json().await.unwrap();
    assert_eq!(
        obs["subject"]["reference"],
        format!("Patient/{patient_id}")
    );
}

#[tokio::test]
async fn test_bundle_transaction_uses_urn_uuid_suffix_as_resource_id() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "fullUrl": "urn:uuid:org1",
                "resource": {
                    "resourceType": "Organization",
                    "name": "Acme Clinic"
                },
                "request": {
                    "method": "POST",
                    "url": "Organization"
                }
            },
            {
                "fullUrl": "urn:uuid:patient-1",
                "resource": {
                    "resourceType": "Patient",
                    "name": [{"family": "Doe"}],
                    "managingOrganization": {"reference": "Organization/urn:uuid:org1"}
                },
                "request": {
                    "method": "POST",
                    "url": "Patient"
                }
            }
        ]
    });

    let resp = client
        .post(&format!("{}/fhir", base_url))
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let result: Value = resp.json().await.unwrap();
    let entries = result["entry"].as_array().unwrap();

    // The Organization's declared urn:uuid becomes its literal resource id.
    let org_location = entries[0]["response"]["location"].as_str().unwrap();
    assert!(org_location.starts_with("Organization/org1/"));

    // The Patient's embedded "Organization/urn:uuid:org1" reference must be
    // resolved to "Organization/org1", not left unresolved.
    let patient_location = entries[1]["response"]["location"].as_str().unwrap();
    let patient_id = patient_location.split('/').nth(1).unwrap();
    let patient_resp = client
        .get(format!("{}/fhir/Patient/{}", base_url, patient_id))
        .send()
        .await
        .unwrap();
    let patient: Value = patient_resp.json().await.unwrap();
    assert_eq!(
        patient["managingOrganization"]["reference"].as_str().unwrap(),
        "Organization/org1"
    );
}

#[tokio::test]
async fn test_bundle_transaction_put_to_tombstoned_id_is_conflict() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({"resourceType": "Patient", "name": [{"family": "Gone"}]});
    let create = client
        .put(format!("{}/fhir/Patient/gone-in-bundle", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(create.status(), 201);

    let delete = client
        .delete(format!("{}/fhir/Patient/gone-in-bundle", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 204);

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "resource": {
                    "resourceType": "Patient",
                    "name": [{"family": "Resurrected"}]
                },
                "request": {
                    "method": "PUT",
                    "url": "Patient/gone-in-bundle"
                }
            }
        ]
    });

    let resp = client
        .post(&format!("{}/fhir", base_url))
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_put_after_delete_is_version_conflict() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "Tombstoned"}]
    });

    let resp = client
        .put(format!("{}/fhir/Patient/gone", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .delete(format!("{}/fhir/Patient/gone", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // The id is now tombstoned; any further PUT must fail as a conflict,
    // never silently resurrect the resource.
    let resp = client
        .put(format!("{}/fhir/Patient/gone", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
}

#[tokio::test]
async fn test_repeated_date_values_without_prefix_rejected() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "Feb"}],
        "birthDate": "1987-02-20"
    });
    client
        .post(format!("{}/fhir/Patient", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();

    // Two unprefixed date values are logically impossible (a single field
    // cannot equal two different dates at once) and must be rejected.
    let resp = client
        .get(format!(
            "{}/fhir/Patient?birthdate=1987-02-20&birthdate=1987-02-21",
            base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    let diagnostics = outcome["issue"][0]["diagnostics"].as_str().unwrap();
    assert!(diagnostics.contains("multiple date range parameters"));
    assert!(diagnostics.contains("without a qualifier"));
}

#[tokio::test]
async fn test_mixed_prefixed_and_unprefixed_date_rejected() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/fhir/Patient?birthdate=1987-02-20&birthdate=ge2020-01-01",
            base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_prefixed_date_range_accepted_and_matches() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "InRange"}],
        "birthDate": "1987-06-15"
    });
    client
        .post(format!("{}/fhir/Patient", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();

    // A ge/le pair describes a closed range and must be accepted, matching
    // any document whose date falls within it.
    let resp = client
        .get(format!(
            "{}/fhir/Patient?birthdate=ge1987-01-01&birthdate=le1987-12-31",
            base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bundle: Value = resp.json().await.unwrap();
    assert!(bundle["total"].as_i64().unwrap() >= 1);
}

#[tokio::test]
async fn test_multivalue_string_search_is_or() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    for family in ["Smith", "Jones"] {
        let patient = json!({
            "resourceType": "Patient",
            "name": [{"family": family}]
        });
        client
            .post(format!("{}/fhir/Patient", base_url))
            .json(&patient)
            .send()
            .await
            .unwrap();
    }

    // Repeated values for the same parameter name OR together; a naive
    // query-string reconstruction that collapses duplicate keys would only
    // ever find one of the two families.
    let resp = client
        .get(format!("{}/fhir/Patient?family=Smith&family=Jones", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 2);
}

#[tokio::test]
async fn test_has_reverse_chain_search() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "ChainTarget"}]
    });
    let resp = client
        .post(format!("{}/fhir/Patient", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();
    let created: Value = resp.json().await.unwrap();
    let patient_id = created["id"].as_str().unwrap();

    let observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "12345"}]},
        "subject": {"reference": format!("Patient/{patient_id}")}
    });
    client
        .post(format!("{}/fhir/Observation", base_url))
        .json(&observation)
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!(
            "{}/fhir/Patient?_has:Observation:subject:code=12345",
            base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], patient_id);
}

/// Drives the full SMART-on-FHIR authorization-code + PKCE + patient-picker
/// flow end to end: login -> patient picker -> consent -> token, asserting
/// the `patient` and `fhirUser` claims make it into both the JWT payload and
/// the top-level token response JSON per spec sections 4.9/4.10.
#[tokio::test]
async fn test_smart_authorization_flow_injects_patient_context() {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use sha2::{Digest, Sha256};

    let (base_url, _dir, state) = start_test_server_with_state().await;

    // Seed a practitioner user directly in the OAuth store (user
    // provisioning is out of this spec's scope; the management API is not
    // part of the core under test).
    state
        .oauth
        .store
        .upsert_user(&haven_store::UserRecord {
            username: "prac1".to_string(),
            password_hash: Some(haven_server::oauth::handlers::hash_password("s3cret")),
            role: "practitioner".to_string(),
            fhir_user: Some("Practitioner/prac1".to_string()),
            status: "active".to_string(),
            auth_method: "password".to_string(),
        })
        .unwrap();

    // Seed the patient the picker will select.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let patient = json!({"resourceType": "Patient", "id": "example", "name": [{"family": "Pickable"}]});
    client
        .put(format!("{}/fhir/Patient/example", base_url))
        .json(&patient)
        .send()
        .await
        .unwrap();

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let authorize_url = format!(
        "{}/oauth2/authorize?response_type=code&client_id=smart-sample-app&redirect_uri={}&scope={}&state=xyz789&code_challenge={}&code_challenge_method=S256",
        base_url,
        urlencoding::encode("https://app.example.org/callback"),
        urlencoding::encode("launch/patient openid fhirUser patient/*.rs"),
        challenge,
    );

    let resp = client.get(&authorize_url).send().await.unwrap();
    assert_eq!(resp.status(), 302);
    let cookie = extract_cookie(&resp);
    assert_eq!(resp.headers().get("location").unwrap(), "/oauth2/login");

    // POST login credentials.
    let resp = client
        .post(format!("{}/oauth2/login", base_url))
        .header("Cookie", &cookie)
        .form(&[("username", "prac1"), ("password", "s3cret")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get("location").unwrap(), "/oauth2/authorize");

    // Follow back to /oauth2/authorize, which must route a practitioner
    // with launch/patient scope to the picker exactly once.
    let resp = client
        .get(&authorize_url)
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get("location").unwrap(), "/patient-picker");

    // Pick the patient.
    let resp = client
        .post(format!("{}/patient-picker", base_url))
        .header("Cookie", &cookie)
        .form(&[("patient_id", "example")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get("location").unwrap(), "/oauth2/authorize");

    // Follow back to /oauth2/authorize, which must now land on consent.
    let resp = client
        .get(&authorize_url)
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get("location").unwrap(), "/consent");

    // Submit consent. Design decisions 3/4: no response_type/code_challenge*
    // in this form, and scopes as repeated `scope=` fields.
    let resp = client
        .post(format!("{}/consent", base_url))
        .header("Cookie", &cookie)
        .form(&[
            ("decision", "allow"),
            ("scope", "launch/patient"),
            ("scope", "openid"),
            ("scope", "fhirUser"),
            ("scope", "patient/*.rs"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("location").unwrap().to_str().unwrap().to_string();
    assert!(location.starts_with("https://app.example.org/callback?code="));
    assert!(location.contains("state=xyz789"));

    let code = location
        .split("code=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap()
        .to_string();

    // Exchange the code for a token.
    let resp = client
        .post(format!("{}/oauth2/token", base_url))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", "https://app.example.org/callback"),
            ("client_id", "smart-sample-app"),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let token_response: Value = resp.json().await.unwrap();
    assert_eq!(token_response["patient"], "example");
    assert_eq!(token_response["fhirUser"], "Practitioner/prac1");
    assert!(token_response["id_token"].is_string());

    // The same claims must be present in the decoded access token JWT.
    let access_token = token_response["access_token"].as_str().unwrap();
    let payload = access_token.split('.').nth(1).unwrap();
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(payload))
        .unwrap();
    let claims: Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(claims["patient"], "example");
    assert_eq!(claims["fhirUser"], "Practitioner/prac1");
}

#[tokio::test]
async fn test_smart_authorization_cancel_at_picker_redirects_with_access_denied() {
    let (base_url, _dir, state) = start_test_server_with_state().await;

    state
        .oauth
        .store
        .upsert_user(&haven_store::UserRecord {
            username: "prac2".to_string(),
            password_hash: Some(haven_server::oauth::handlers::hash_password("s3cret")),
            role: "practitioner".to_string(),
            fhir_user: Some("Practitioner/prac2".to_string()),
            status: "active".to_string(),
            auth_method: "password".to_string(),
        })
        .unwrap();

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let authorize_url = format!(
        "{}/oauth2/authorize?response_type=code&client_id=smart-sample-app&redirect_uri={}&scope={}&state=cancelme",
        base_url,
        urlencoding::encode("http://localhost:8000/callback"),
        urlencoding::encode("launch/patient"),
    );

    let resp = client.get(&authorize_url).send().await.unwrap();
    let cookie = extract_cookie(&resp);

    client
        .post(format!("{}/oauth2/login", base_url))
        .header("Cookie", &cookie)
        .form(&[("username", "prac2"), ("password", "s3cret")])
        .send()
        .await
        .unwrap();

    client
        .get(&authorize_url)
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/patient-picker", base_url))
        .header("Cookie", &cookie)
        .form(&[("action", "cancel")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.starts_with("http://localhost:8000/callback"));
    assert!(location.contains("error=access_denied"));
    assert!(location.contains("state=cancelme"));
}

fn extract_cookie(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// Like `start_test_server`, but also returns the shared `AppState` so tests
/// can seed users directly in the OAuth store.
async fn start_test_server_with_state() -> (String, TempDir, Arc<AppState>) {
    let temp_dir = TempDir::new().unwrap();

    let store = SqliteStore::open(temp_dir.path().join("resources.sqlite")).unwrap();
    let index = SearchIndex::open(temp_dir.path().join("search_index.sqlite")).unwrap();
    let audit = AuditLog::open(temp_dir.path().join("audit.sqlite")).unwrap();
    let oauth_store = OAuthStore::open(temp_dir.path().join("oauth.sqlite")).unwrap();
    let oauth = OAuthState::new(oauth_store).unwrap();

    let state = Arc::new(AppState {
        store,
        index: Mutex::new(index),
        audit: Arc::new(Mutex::new(audit)),
        config: ServerConfig::default(),
        profile_registry: ProfileRegistry::new(),
        terminology_registry: TerminologyRegistry::new(),
        search_param_registry: SearchParamRegistry::new(),
        compartment_def: CompartmentDef::patient_compartment(),
        jwk_cache: tokio::sync::RwLock::new(haven_server::auth::JwkCache::new()),
        oauth,
    });

    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), temp_dir, state)
}
