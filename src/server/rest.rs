//! Implementation of the actix server.

use actix_web::{
    delete, get,
    middleware::Logger,
    post,
    web::{Data, Json, Path, Query},
    App, HttpRequest, HttpResponse, HttpServer, Responder, ResponseError,
};
use serde::Deserialize;
use serde_json::json;

use crate::authz::{AuthzGate, RequestContext};
use crate::beacon;
use crate::catalog::drs::{Cohort, DrsObject};
use crate::catalog::refseq::RefseqField;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::drs;
use crate::err::OpError;
use crate::htsget::{self, FileType};

/// Shared state of the web server.
pub struct WebServerData {
    pub store: CatalogStore,
    pub gate: AuthzGate,
    pub config: Config,
}

#[derive(Debug)]
struct ApiError {
    err: OpError,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl From<OpError> for ApiError {
    fn from(err: OpError) -> Self {
        ApiError { err }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.err.status_code())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "message": self.err.to_string() }))
    }
}

/// Extract the authorization-relevant parts of a request.
fn request_context(req: &HttpRequest) -> RequestContext {
    let bearer_token = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .map(|(_, token)| token.to_string());
    let service_token = req
        .headers()
        .get("X-Service-Token")
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    RequestContext {
        bearer_token,
        service_token,
        method: req.method().to_string(),
        path: req.path().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ListObjectsQuery {
    cohort: Option<String>,
}

/// List DRS objects visible to the requester.
#[get("/ga4gh/drs/v1/objects")]
async fn list_objects(
    data: Data<WebServerData>,
    req: HttpRequest,
    query: Query<ListObjectsQuery>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let objects = drs::list_objects(
        &data.store,
        &data.gate,
        &ctx,
        query.cohort.as_deref(),
    )
    .await?;
    Ok(Json(objects))
}

/// Fetch a DRS object; `{id}/access_url/{access_id}` tails dispatch to
/// access-URL resolution (both segments may contain `/`).
#[get("/ga4gh/drs/v1/objects/{tail:.*}")]
async fn get_object(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    let tail = path.into_inner();
    if let Some((object_id, access_id)) = tail.split_once("/access_url/") {
        let resolved =
            drs::get_access_url(&data.store, &data.gate, &ctx, object_id, access_id).await?;
        return Ok(HttpResponse::Ok().json(resolved));
    }
    let object = drs::get_object(&data.store, &data.gate, &ctx, &tail).await?;
    Ok(HttpResponse::Ok().json(object))
}

/// Create or update a DRS object.
#[post("/ga4gh/drs/v1/objects")]
async fn post_object(
    data: Data<WebServerData>,
    req: HttpRequest,
    body: Json<DrsObject>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let object = drs::post_object(&data.store, &data.gate, &ctx, &body).await?;
    Ok(Json(object))
}

/// Delete a DRS object and its children.
#[delete("/ga4gh/drs/v1/objects/{tail:.*}")]
async fn delete_object(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let object = drs::delete_object(&data.store, &data.gate, &ctx, &path).await?;
    Ok(Json(object))
}

/// List cohorts visible to the requester.
#[get("/ga4gh/drs/v1/cohorts")]
async fn list_cohorts(
    data: Data<WebServerData>,
    req: HttpRequest,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let cohorts = drs::list_cohorts(&data.store, &data.gate, &ctx).await?;
    Ok(Json(cohorts))
}

/// Create a cohort.
#[post("/ga4gh/drs/v1/cohorts")]
async fn post_cohort(
    data: Data<WebServerData>,
    req: HttpRequest,
    body: Json<Cohort>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let cohort = drs::post_cohort(&data.store, &data.gate, &ctx, &body).await?;
    Ok(Json(cohort))
}

/// Fetch one cohort.
#[get("/ga4gh/drs/v1/cohorts/{cohort_id}")]
async fn get_cohort(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let cohort = drs::get_cohort(&data.store, &data.gate, &ctx, &path).await?;
    Ok(Json(cohort))
}

/// Delete a cohort and all of its objects.
#[delete("/ga4gh/drs/v1/cohorts/{cohort_id}")]
async fn delete_cohort(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let cohort = drs::delete_cohort(&data.store, &data.gate, &ctx, &path).await?;
    Ok(Json(cohort))
}

/// Indexing status of a cohort.
#[get("/ga4gh/drs/v1/cohorts/{cohort_id}/status")]
async fn cohort_status(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let status = drs::cohort_status(
        &data.store,
        &data.gate,
        &ctx,
        &data.config.indexing_path,
        &path,
    )
    .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct HtsgetQuery {
    #[serde(rename = "referenceName")]
    reference_name: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
    class: Option<String>,
    format: Option<String>,
}

#[get("/htsget/v1/variants/service-info")]
async fn variants_service_info() -> impl Responder {
    Json(htsget::service_info(FileType::Variant))
}

#[get("/htsget/v1/reads/service-info")]
async fn reads_service_info() -> impl Responder {
    Json(htsget::service_info(FileType::Read))
}

async fn data_response(
    data: &WebServerData,
    ctx: &RequestContext,
    file_type: FileType,
    id: &str,
    query: &HtsgetQuery,
) -> Result<HttpResponse, ApiError> {
    let slice = htsget::get_data(
        &data.store,
        &data.gate,
        ctx,
        &data.config,
        id,
        query.reference_name.as_deref(),
        query.start,
        query.end,
        query.class.as_deref(),
        query.format.as_deref().or(match file_type {
            FileType::Read => Some("bam"),
            FileType::Variant => None,
        }),
    )
    .await?;
    let bytes = std::fs::read(slice.temp_file.path())
        .map_err(|e| OpError::Internal(anyhow::anyhow!("could not read slice: {}", e)))?;
    Ok(HttpResponse::Ok()
        .insert_header(("x-filename", slice.file_name.clone()))
        .insert_header(("Access-Control-Expose-Headers", "x-filename"))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", slice.file_name),
        ))
        .body(bytes))
}

/// Stream a variant slice; `format=VCF-JSON` returns the parsed records
/// instead of VCF text.
#[get("/htsget/v1/variants/data/{id:.*}")]
async fn variants_data(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
    query: Query<HtsgetQuery>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    if query.format.as_deref() == Some("VCF-JSON") {
        if data.gate.is_authed(&path, &ctx).await != 200 {
            return Err(OpError::Forbidden(format!("not authorized to view {}", *path)).into());
        }
        let parsed = beacon::parse_vcf_file(
            &data.store,
            &data.config,
            &path,
            query.reference_name.as_deref(),
            query.start,
            query.end,
        )
        .await?;
        return Ok(HttpResponse::Ok().json(parsed));
    }
    data_response(&data, &ctx, FileType::Variant, &path, &query).await
}

/// Stream a read slice.
#[get("/htsget/v1/reads/data/{id:.*}")]
async fn reads_data(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
    query: Query<HtsgetQuery>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    data_response(&data, &ctx, FileType::Read, &path, &query).await
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    genome: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    do_not_index: bool,
}

/// Enqueue indexing of a variant object.
#[get("/htsget/v1/variants/{id:.*}/index")]
async fn variants_index(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
    query: Query<IndexQuery>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    let varfile = htsget::index_variants(
        &data.store,
        &data.gate,
        &ctx,
        &data.config,
        &path,
        query.genome.as_deref().unwrap_or("hg38"),
        query.force,
        query.do_not_index,
    )
    .await?;
    Ok(HttpResponse::Ok().json(varfile))
}

/// Enqueue stats-only indexing of a read object.
#[get("/htsget/v1/reads/{id:.*}/index")]
async fn reads_index(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    htsget::index_reads(&data.store, &data.gate, &ctx, &data.config, &path).await?;
    Ok(HttpResponse::Ok().json(serde_json::Value::Null))
}

async fn verify_response(
    data: &WebServerData,
    ctx: &RequestContext,
    id: &str,
    check_auth: bool,
) -> Result<HttpResponse, ApiError> {
    if check_auth && data.gate.is_authed(id, ctx).await != 200 {
        return Err(OpError::Forbidden(
            "User is not authorized to verify variants".to_string(),
        )
        .into());
    }
    let cache_dir = htsget::staging_dir(&data.config);
    match drs::verify_genomic_drs_object(&data.store, &cache_dir, id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({ "result": true }))),
        Err(e) => Ok(HttpResponse::Ok().json(json!({
            "result": false,
            "message": e.to_string()
        }))),
    }
}

/// Verify a variant-bearing GenomicDrsObject.
#[get("/htsget/v1/variants/{id:.*}/verify")]
async fn variants_verify(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    verify_response(&data, &ctx, &path, true).await
}

/// Verify a read-bearing GenomicDrsObject.
#[get("/htsget/v1/reads/{id:.*}/verify")]
async fn reads_verify(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    verify_response(&data, &ctx, &path, false).await
}

/// htsget ticket for a variant object.
#[get("/htsget/v1/variants/{id:.*}")]
async fn variants_ticket(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
    query: Query<HtsgetQuery>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let ticket = htsget::get_urls(
        &data.store,
        &data.gate,
        &ctx,
        &data.config,
        FileType::Variant,
        &path,
        query.reference_name.as_deref(),
        query.start,
        query.end,
        query.class.as_deref(),
    )
    .await?;
    Ok(Json(ticket))
}

/// htsget ticket for a read object.
#[get("/htsget/v1/reads/{id:.*}")]
async fn reads_ticket(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
    query: Query<HtsgetQuery>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let ticket = htsget::get_urls(
        &data.store,
        &data.gate,
        &ctx,
        &data.config,
        FileType::Read,
        &path,
        query.reference_name.as_deref(),
        query.start,
        query.end,
        query.class.as_deref(),
    )
    .await?;
    Ok(Json(ticket))
}

#[get("/beacon/v2/service-info")]
async fn beacon_service_info() -> impl Responder {
    Json(beacon::service_info())
}

#[derive(Debug, Deserialize)]
struct BeaconGetQuery {
    start: Option<i64>,
    end: Option<i64>,
    #[serde(alias = "assemblyId")]
    assembly_id: Option<String>,
    #[serde(alias = "referenceName")]
    reference_name: Option<String>,
    #[serde(alias = "referenceBases")]
    reference_bases: Option<String>,
    #[serde(alias = "alternateBases")]
    alternate_bases: Option<String>,
    #[serde(alias = "variantMinLength")]
    variant_min_length: Option<i64>,
    #[serde(alias = "variantMaxLength")]
    variant_max_length: Option<i64>,
    allele: Option<String>,
    #[serde(alias = "geneId")]
    gene_id: Option<String>,
}

/// Beacon v2 variant search, GET parameter form.
#[get("/beacon/v2/g_variants")]
async fn beacon_get(
    data: Data<WebServerData>,
    req: HttpRequest,
    query: Query<BeaconGetQuery>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let request = beacon::BeaconRequest {
        query: beacon::BeaconQuery {
            request_parameters: beacon::RequestParameters {
                start: query.start.map(|start| vec![start]),
                end: query.end.map(|end| vec![end]),
                assembly_id: query.assembly_id.clone(),
                reference_name: query.reference_name.clone(),
                reference_bases: query.reference_bases.clone(),
                alternate_bases: query.alternate_bases.clone(),
                variant_min_length: query.variant_min_length,
                variant_max_length: query.variant_max_length,
                genomic_allele_short_form: query.allele.clone(),
                gene_id: query.gene_id.clone(),
            },
            filters: None,
        },
        requested_granularity: Some("record".to_string()),
        ..Default::default()
    };
    let response = beacon::search(&data.store, &data.gate, &ctx, &data.config, &request).await?;
    Ok(Json(response))
}

/// Beacon v2 variant search, POST form.
#[post("/beacon/v2/g_variants")]
async fn beacon_post(
    data: Data<WebServerData>,
    req: HttpRequest,
    body: Json<beacon::BeaconRequest>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let response = beacon::search(&data.store, &data.gate, &ctx, &data.config, &body).await?;
    Ok(Json(response))
}

/// List all known gene names.
#[get("/genes")]
async fn list_genes(
    data: Data<WebServerData>,
) -> actix_web::Result<impl Responder, ApiError> {
    let results = htsget::list_genes(&data.store, RefseqField::GeneName).await?;
    Ok(Json(json!({ "results": results })))
}

/// Prefix-search gene names.
#[get("/genes/{id:.*}")]
async fn match_genes(
    data: Data<WebServerData>,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let results = htsget::get_matching_genes(&data.store, &path, RefseqField::GeneName).await?;
    Ok(Json(json!({ "results": results })))
}

/// List all known transcript names.
#[get("/transcripts")]
async fn list_transcripts(
    data: Data<WebServerData>,
) -> actix_web::Result<impl Responder, ApiError> {
    let results = htsget::list_genes(&data.store, RefseqField::TranscriptName).await?;
    Ok(Json(json!({ "results": results })))
}

/// Prefix-search transcript names.
#[get("/transcripts/{id:.*}")]
async fn match_transcripts(
    data: Data<WebServerData>,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let results =
        htsget::get_matching_genes(&data.store, &path, RefseqField::TranscriptName).await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
struct SamplesBody {
    samples: Vec<String>,
}

/// Resolve one sample.
#[get("/samples/{id:.*}")]
async fn get_sample(
    data: Data<WebServerData>,
    req: HttpRequest,
    path: Path<String>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    if data.gate.is_authed(&path, &ctx).await != 200 {
        return Err(OpError::NotFound(format!("Could not find sample {}", path)).into());
    }
    let info = drs::get_sample_info(&data.store, &path).await?;
    Ok(Json(info))
}

/// Resolve several samples, filtered by cohort authorization.
#[post("/samples")]
async fn post_samples(
    data: Data<WebServerData>,
    req: HttpRequest,
    body: Json<SamplesBody>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let samples = drs::get_samples(&data.store, &data.gate, &ctx, &body.samples).await?;
    Ok(Json(samples))
}

#[derive(Debug, Deserialize)]
struct CohortSamplesQuery {
    cohort: Option<String>,
}

/// List samples, optionally restricted to one cohort.
#[get("/samples")]
async fn list_samples(
    data: Data<WebServerData>,
    req: HttpRequest,
    query: Query<CohortSamplesQuery>,
) -> actix_web::Result<impl Responder, ApiError> {
    let ctx = request_context(&req);
    let samples =
        drs::get_cohort_samples(&data.store, &data.gate, &ctx, query.cohort.as_deref()).await?;
    Ok(Json(samples))
}

#[actix_web::main]
pub async fn main(config: Config) -> Result<(), anyhow::Error> {
    let store = CatalogStore::open(&config.db_path, config.bucket_size, &config.htsget_url)
        .await?;
    let gate = AuthzGate::new(store.clone(), &config);
    let data = Data::new(WebServerData {
        store,
        gate,
        config: config.clone(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(list_objects)
            .service(post_object)
            .service(list_cohorts)
            .service(post_cohort)
            .service(cohort_status)
            .service(get_cohort)
            .service(delete_cohort)
            .service(get_object)
            .service(delete_object)
            .service(variants_service_info)
            .service(reads_service_info)
            .service(variants_data)
            .service(reads_data)
            .service(variants_index)
            .service(reads_index)
            .service(variants_verify)
            .service(reads_verify)
            .service(variants_ticket)
            .service(reads_ticket)
            .service(beacon_service_info)
            .service(beacon_get)
            .service(beacon_post)
            .service(list_genes)
            .service(match_genes)
            .service(list_transcripts)
            .service(match_transcripts)
            .service(post_samples)
            .service(list_samples)
            .service(get_sample)
            .wrap(Logger::default())
    })
    .bind((config.listen_host.as_str(), config.listen_port))?
    .run()
    .await?;

    Ok(())
}
