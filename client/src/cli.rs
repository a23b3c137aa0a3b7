use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{config, JobInfo, JobResults, ReduceJobRequest, SequenceFileWriter, WorkerSummary};
use reqwest::Client;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job de reduce sobre las particiones que dejó el map
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        /// Cantidad de particiones (mapFile-0..N)
        #[arg(long, default_value_t = 1)]
        partitions: u32,

        /// Formato de salida: text | sequence
        #[arg(long, default_value = "text")]
        format: String,

        /// Reducer: sum | count | concat | identity
        #[arg(long, default_value = "sum")]
        reducer: String,

        #[arg(long, default_value = "/data/output")]
        output_dir: String,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista las salidas de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    Workers,

    /// Convierte un TSV `clave<TAB>valor` en un archivo intermedio ordenado
    Encode {
        #[arg(value_name = "ENTRADA_TSV")]
        input: String,

        #[arg(value_name = "SALIDA")]
        output: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = config::master_url();

    match cli.command {
        Commands::Submit {
            name,
            partitions,
            format,
            reducer,
            output_dir,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = ReduceJobRequest {
                name,
                partitions,
                output_format: format,
                reducer,
                output_dir,
            };

            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!("el master rechazó el job ({}): {}", status, body);
            }
            let job_info: JobInfo = resp.json().await?;

            println!("Job creado:");
            println!("  id: {}", job_info.id);
            println!("  nombre: {}", job_info.name);
            println!("  estado: {:?}", job_info.status);
            println!("  particiones: {}", job_info.partitions);
            println!("  reducer: {}", job_info.reducer);
            println!("  formato: {}", job_info.output_format);
            println!("  output_dir: {}", job_info.output_dir);
            println!("  submitted_at: {}", job_info.submitted_at);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let job: JobInfo = resp.json().await?;
                println!("Job:");
                println!("  id: {}", job.id);
                println!("  nombre: {}", job.name);
                println!("  estado: {:?}", job.status);
                println!(
                    "  particiones: total={}, asignadas={}, terminadas={}, reasignaciones={}",
                    job.partitions,
                    job.assigned_partitions,
                    job.completed_partitions,
                    job.reassignments
                );

                if job.partitions > 0 {
                    let pct = (job.completed_partitions as f64 / job.partitions as f64) * 100.0;
                    println!("  progreso: {:.1}%", pct);
                } else {
                    println!("  progreso: (sin particiones)");
                }

                println!("  output_dir: {}", job.output_dir);
                println!("  submitted_at: {}", job.submitted_at);
                if let Some(ref started) = job.started_at {
                    println!("  iniciado: {}", started);
                }
                if let Some(ref done) = job.finished_at {
                    println!("  finalizado: {}", done);
                }
                if let Some(ref err) = job.error {
                    println!("  error: {}", err);
                }
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Results { id } => {
            let url = format!("{}/api/v1/jobs/{id}/results", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let results: JobResults = resp.json().await?;
                println!("Resultados para job {} ({:?}):", results.job_id, results.status);
                println!("  directorio de salida: {}", results.output_dir);
                if results.finished.is_empty() {
                    println!("  (ninguna partición terminada todavía)");
                }
                for f in &results.finished {
                    match &f.output {
                        Some(out) => println!(
                            "    - partición {} (worker {}): {}",
                            f.partition, f.worker_id, out
                        ),
                        None => println!(
                            "    - partición {} (worker {}): vacía",
                            f.partition, f.worker_id
                        ),
                    }
                }
                if !results.files.is_empty() {
                    println!("  archivos:");
                    for f in results.files {
                        println!("    - {}", f);
                    }
                }
            } else {
                println!("No se encontraron resultados para job {id}");
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerSummary> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers registrados.");
                } else {
                    for w in workers {
                        println!("Worker {}", w.worker_id);
                        println!("  host      : {}", w.hostname);
                        println!("  estado    : {}", w.state);
                        println!("  comando   : {}", w.command.as_str());
                        match w.partition {
                            Some(p) => println!("  partición : {}", p),
                            None => println!("  partición : (ninguna)"),
                        }
                        println!("  mapFiles  : {}", w.map_files);
                        if let Some(out) = w.output {
                            println!("  salida    : {}", out);
                        }
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/workers (status {})",
                    resp.status()
                );
            }
        }

        Commands::Encode { input, output } => {
            let n = encode_tsv(&input, &output)?;
            println!("{} registros escritos en {}", n, output);
        }
    }

    Ok(())
}

/// Lee `clave<TAB>valor` por línea, ordena por clave (estable) y escribe el
/// formato binario de registros que consume el reduce.
pub fn encode_tsv(input: &str, output: &str) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("no se pudo abrir {}", input))?;

    let mut records: Vec<(String, String)> = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("{}: línea {} inválida", input, line + 1))?;
        let key = row.get(0).unwrap_or_default().to_string();
        let value = row.get(1).unwrap_or_default().to_string();
        records.push((key, value));
    }

    records.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut writer = SequenceFileWriter::create(output)
        .with_context(|| format!("no se pudo crear {}", output))?;
    for (k, v) in &records {
        writer.write_record(k.as_bytes(), v.as_bytes())?;
    }
    writer.flush()?;

    Ok(records.len())
}
