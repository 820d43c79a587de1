use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursehub::config::Config;
use coursehub::db::{create_pool, init_db, queries, AppState};
use coursehub::handlers;
use coursehub::models::{CreateCoupon, CreateCourse, CreateUser};
use coursehub::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "coursehub")]
#[command(about = "Checkout and entitlement backend for an online course marketplace")]
struct Cli {
    /// Seed the database with dev data (users, a course, a coupon)
    #[arg(long)]
    seed: bool,
}

const DEV_SESSION_TTL_SECS: i64 = 30 * 86400;

/// Seeds the database with dev data for manual testing.
/// Creates a learner, an admin, a published course, and a coupon.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::list_published_courses(&conn)
        .expect("Failed to list courses")
        .first()
        .is_some()
    {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let learner = queries::create_user(
        &conn,
        &CreateUser {
            email: "learner@coursehub.local".to_string(),
            name: "Dev Learner".to_string(),
            admin: false,
        },
    )
    .expect("Failed to create dev learner");
    let learner_token = queries::create_session(&conn, &learner.id, DEV_SESSION_TTL_SECS)
        .expect("Failed to create learner session");

    let admin = queries::create_user(
        &conn,
        &CreateUser {
            email: "admin@coursehub.local".to_string(),
            name: "Dev Admin".to_string(),
            admin: true,
        },
    )
    .expect("Failed to create dev admin");
    let admin_token = queries::create_session(&conn, &admin.id, DEV_SESSION_TTL_SECS)
        .expect("Failed to create admin session");

    let course = queries::create_course(
        &conn,
        &CreateCourse {
            title: "Intro to CourseHub".to_string(),
            description: Some("A three-lesson sample course".to_string()),
            price: 50.0,
            published: true,
            lessons: vec![
                "Getting Started".to_string(),
                "Core Concepts".to_string(),
                "Wrapping Up".to_string(),
            ],
        },
    )
    .expect("Failed to create dev course");

    let coupon = queries::create_coupon(
        &conn,
        &CreateCoupon {
            code: "LAUNCH25".to_string(),
            discount_percentage: 25.0,
            active: true,
        },
    )
    .expect("Failed to create dev coupon");

    tracing::info!("Learner: {} (token below)", learner.email);
    tracing::info!("Admin: {} (token below)", admin.email);
    tracing::info!("Course: {} (id: {})", course.course.title, course.course.id);
    tracing::info!("Coupon: {} ({}%)", coupon.code, coupon.discount_percentage);

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  learner_token: {}", learner_token);
    println!("  admin_token: {}", admin_token);
    println!("  course_id: {}", course.course.id);
    println!("  coupon_code: {}", coupon.code);
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursehub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        gateway: Arc::new(StripeClient::new(&config.stripe)),
        currency: config.currency.clone(),
        sitewide_discount: config.sitewide_discount,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set COURSEHUB_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if let Some(pct) = config.sitewide_discount {
        tracing::info!("Sitewide promotion enabled: {}% off", pct);
    }

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("CourseHub server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
