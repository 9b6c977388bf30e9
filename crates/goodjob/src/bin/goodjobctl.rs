//! Minimal operator CLI over the library's operator API (spec §6.5): no
//! dashboard, just the handful of commands an operator needs from a shell
//! or a deploy hook.

use std::env;

use goodjob::jobs::JobsRepo;
use goodjob::pause::PauseRegistry;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "goodjobctl <command>\n\
             Commands:\n\
             - install\n\
             - stats\n\
             - health\n\
             - pause-queue <name>\n\
             - unpause-queue <name>\n\
             - pause-job-class <name>\n\
             - unpause-job-class <name>\n\
             - retry <job_id>\n\
             \n\
             Uses DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;

    match args[1].as_str() {
        "install" => {
            goodjob::install(&pool).await?;
            println!("migrations applied");
        }
        "stats" => {
            let stats = goodjob::stats(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "health" => {
            let health = goodjob::health_check(&pool).await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        "pause-queue" => {
            let name = args.get(2).expect("usage: goodjobctl pause-queue <name>");
            PauseRegistry::new(pool).pause_queue(name).await?;
            println!("paused queue {name}");
        }
        "unpause-queue" => {
            let name = args.get(2).expect("usage: goodjobctl unpause-queue <name>");
            PauseRegistry::new(pool).unpause_queue(name).await?;
            println!("unpaused queue {name}");
        }
        "pause-job-class" => {
            let name = args.get(2).expect("usage: goodjobctl pause-job-class <name>");
            PauseRegistry::new(pool).pause_job_class(name).await?;
            println!("paused job class {name}");
        }
        "unpause-job-class" => {
            let name = args.get(2).expect("usage: goodjobctl unpause-job-class <name>");
            PauseRegistry::new(pool).unpause_job_class(name).await?;
            println!("unpaused job class {name}");
        }
        "retry" => {
            let id = args.get(2).expect("usage: goodjobctl retry <job_id>");
            let job_id: Uuid = id.parse()?;
            let job = JobsRepo::new(pool).retry(job_id).await?;
            println!("retried as job {}", job.id);
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}
