//! rfmseg: RFM scoring, segmentation and clustering of customer transactions
//!
//! This is the main entrypoint that orchestrates loading, analysis,
//! reporting and prediction.

use anyhow::Result;
use clap::Parser;
use rfm_segmentation::cli::load_transactions;
use rfm_segmentation::{analyze, Analysis, AnalysisConfig, Args};
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = args.build_config()?;

    if let Some(rfm_values) = args.parse_rfm_values()? {
        if !config.include_clustering {
            anyhow::bail!("--predict needs clustering; drop --no-clustering");
        }
        run_prediction_mode(&args, &config, rfm_values)?;
    } else {
        run_full_pipeline(&args, &config)?;
    }

    Ok(())
}

fn run_analysis(args: &Args, config: &AnalysisConfig) -> Result<Analysis> {
    let load_start = Instant::now();
    let transactions = load_transactions(&args.input)?;
    log::info!(
        "Loaded {} transactions from {} in {:.2}s",
        transactions.len(),
        args.input.display(),
        load_start.elapsed().as_secs_f64()
    );

    let analysis = analyze(&transactions, config)?;
    Ok(analysis)
}

/// Run prediction mode for a single customer
fn run_prediction_mode(args: &Args, config: &AnalysisConfig, rfm_values: [f64; 3]) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input RFM values: R={}, F={}, M={}",
        rfm_values[0], rfm_values[1], rfm_values[2]
    );

    let start_time = Instant::now();
    let analysis = run_analysis(args, config)?;
    let cluster = analysis.predict_cluster(&rfm_values)?;
    let Some(clusters) = &analysis.clusters else {
        anyhow::bail!("Analysis finished without a cluster model");
    };
    let model = &clusters.model;

    println!("\nPredicted Cluster: {cluster}");
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    let sizes = model.cluster_sizes();
    let total_customers = analysis.metrics.len();
    println!("\nCluster {cluster} details:");
    println!(
        "  Size: {} customers ({:.1}% of total)",
        sizes[cluster],
        sizes[cluster] as f64 / total_customers as f64 * 100.0
    );
    if let Some(segment) = analysis
        .reconciliation
        .as_ref()
        .and_then(|r| r.dominant_segment(cluster))
    {
        println!("  Dominant segment: {segment}");
    }
    println!(
        "  Centroid (scaled): R={:.2}, F={:.2}, M={:.2}",
        model.centroids[[cluster, 0]],
        model.centroids[[cluster, 1]],
        model.centroids[[cluster, 2]]
    );

    Ok(())
}

/// Run the full scoring, segmentation and clustering pipeline
fn run_full_pipeline(args: &Args, config: &AnalysisConfig) -> Result<()> {
    println!("=== RFM Segmentation Pipeline ===\n");

    let start_time = Instant::now();
    let analysis = run_analysis(args, config)?;
    let total = analysis.metrics.len() as f64;

    let summary = &analysis.summary;
    println!("Data Summary:");
    println!("- Total transactions: {}", summary.total_transactions);
    println!("- Unique customers: {}", summary.unique_customers);
    println!(
        "- Date range: {} to {}",
        summary.first_transaction.format("%Y-%m-%d"),
        summary.last_transaction.format("%Y-%m-%d")
    );
    println!("- Total revenue: {:.2}", summary.total_revenue);
    println!("- Average transaction: {:.2}", summary.mean_transaction);
    if analysis.metrics.future_dated > 0 {
        println!(
            "- Transactions after reference date: {}",
            analysis.metrics.future_dated
        );
    }

    println!("\n=== Segment Distribution ===");
    for (segment, count) in analysis.segment_distribution() {
        println!(
            "{segment}: {count} customers ({:.1}%)",
            count as f64 / total * 100.0
        );
    }

    if let (Some(clusters), Some(reconciliation), Some(profiles)) = (
        &analysis.clusters,
        &analysis.reconciliation,
        &analysis.cluster_profiles,
    ) {
        let selection = &clusters.selection;
        println!("\n=== Cluster Selection ===");
        if args.verbose {
            for c in &selection.candidates {
                println!(
                    "k={:>2}  inertia={:>12.3}  silhouette={:.3}  smallest={}",
                    c.k, c.inertia, c.silhouette, c.min_cluster_size
                );
            }
        }
        println!(
            "Selected k={} by {:?} (silhouette {:.3})",
            selection.selected_k, selection.method, clusters.silhouette
        );
        if let Some(k) = selection.elbow_k {
            println!("Elbow method suggests: {k}");
        }

        println!("\n=== Cluster Statistics ===");
        for profile in profiles {
            let dominant = reconciliation
                .dominant_segment(profile.group)
                .map(|s| s.to_string())
                .unwrap_or_default();
            println!(
                "Cluster {}: {} customers ({:.1}%), mean R={:.1} F={:.1} M={:.2}, mostly {dominant}",
                profile.group,
                profile.customers,
                profile.percentage,
                profile.recency.mean,
                profile.frequency.mean,
                profile.monetary.mean
            );
        }

        println!("\n=== Reconciliation ===");
        for d in &reconciliation.dominant_clusters {
            println!(
                "{}: cluster {} ({} customers, {:.1}%)",
                d.segment,
                d.cluster,
                d.count,
                d.share * 100.0
            );
        }
        println!("Agreement ratio: {:.3}", reconciliation.agreement_ratio);
    } else {
        println!("\nClustering skipped.");
    }

    if let Some(path) = &args.output {
        std::fs::write(path, analysis.to_json()?)?;
        println!("\nAnalysis written to: {}", path.display());
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}
