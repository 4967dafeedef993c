//! Craft Planner command line

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use craft_planner::cancel::CancelToken;
use craft_planner::models::{CraftingPlan, PlanNode};
use craft_planner::progress::ProgressUpdate;
use craft_planner::scheduler::AutoRefreshScheduler;
use craft_planner::services::{
    BuildTarget, OptimizationMode, PriceRefreshService, RecipeTreeService, ShoppingOptions, ShoppingService,
};
use craft_planner::state::AppState;
use tokio::sync::{mpsc, RwLock};

#[derive(Parser)]
#[command(name = "craft-planner")]
#[command(about = "Crafting plans with market pricing and shopping lists")]
struct Cli {
    /// Directory holding the planner database
    #[arg(short, long, default_value = "craft-planner-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and price a new plan from ITEM_ID:QTY targets
    Plan {
        /// Data center or world to price against
        region: String,

        /// Targets as ITEM_ID:QTY (QTY defaults to 1)
        #[arg(required = true)]
        targets: Vec<String>,

        /// Require high quality for every target
        #[arg(long)]
        hq: bool,
    },

    /// Refresh prices of a saved plan
    Refresh { plan_id: String },

    /// Recommend where to buy a saved plan's materials
    Shop {
        plan_id: String,

        #[arg(short, long, value_enum, default_value = "cost")]
        mode: Mode,

        /// Search every configured data center
        #[arg(long)]
        all_regions: bool,

        /// Never recommend splitting a purchase across worlds
        #[arg(long)]
        no_split: bool,
    },

    /// Keep refreshing a saved plan's prices until interrupted
    Watch {
        plan_id: String,

        /// Minutes between refreshes; defaults to the configured interval
        #[arg(short, long)]
        minutes: Option<u64>,
    },

    /// List saved plans
    List,

    /// Delete a saved plan
    Delete { plan_id: String },

    /// Show market cache statistics
    CacheStats,

    /// Drop all cached market data
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Cost,
    Worlds,
    Home,
}

impl From<Mode> for OptimizationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Cost => OptimizationMode::MinimizeTotalCost,
            Mode::Worlds => OptimizationMode::MinimizeWorlds,
            Mode::Home => OptimizationMode::PreferHomeWorld,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    craft_planner::init_tracing();
    let cli = Cli::parse();

    let state = Arc::new(AppState::new(&cli.data_dir)?);
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (progress, mut updates) = mpsc::unbounded_channel::<ProgressUpdate>();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            tracing::debug!(
                "[{:?}] {}/{} {}",
                update.stage,
                update.completed,
                update.total,
                update.message
            );
        }
    });

    match cli.command {
        Commands::Plan { region, targets, hq } => {
            let targets = targets
                .iter()
                .map(|t| parse_target(t, hq))
                .collect::<Result<Vec<_>>>()?;

            let mut plan = RecipeTreeService::build_plan(&state, targets, &region, &progress, &cancel).await?;
            let refresh = PriceRefreshService::refresh_plan(&state, &mut plan, &region, &progress, &cancel).await?;
            state.db()?.save_plan(&plan)?;

            print_plan(&plan);
            println!("\n{}", refresh.message);
            println!("Saved as {}", plan.id);
        }

        Commands::Refresh { plan_id } => {
            let mut plan = load(&state, &plan_id)?;
            let region = plan.data_center.clone();
            let refresh = PriceRefreshService::refresh_plan(&state, &mut plan, &region, &progress, &cancel).await?;
            print_plan(&plan);
            println!("\n{}", refresh.message);
        }

        Commands::Shop {
            plan_id,
            mode,
            all_regions,
            no_split,
        } => {
            let mut plan = load(&state, &plan_id)?;
            let region = plan.data_center.clone();
            PriceRefreshService::refresh_plan(&state, &mut plan, &region, &progress, &cancel).await?;

            let options = ShoppingOptions {
                allow_split: !no_split,
                home_world: plan.world.clone().or(state.config().home_world),
            };
            let result = ShoppingService::optimize(
                &state,
                &plan,
                mode.into(),
                &region,
                all_regions,
                &options,
                &progress,
                &cancel,
            )
            .await?;

            for item in &result.plans {
                match (&item.split, &item.recommended_world) {
                    (Some(split), _) => {
                        println!("{} x{}:", item.name, item.quantity);
                        for share in split {
                            println!("    {:<16} {:>5} for {:>10} gil", share.world_name, share.quantity, share.cost);
                        }
                    }
                    (None, Some(world)) => println!(
                        "{} x{}: {} for {} gil{}",
                        item.name,
                        item.quantity,
                        world.world_name,
                        world.total_cost,
                        if world.has_sufficient_stock { "" } else { " (not enough stock)" }
                    ),
                    (None, None) => println!("{} x{}: no listings", item.name, item.quantity),
                }
            }
            println!("\n{} (total {} gil)", result.message, result.total_cost);
        }

        Commands::Watch { plan_id, minutes } => {
            let plan = load(&state, &plan_id)?;
            let region = plan.data_center.clone();
            let plan = Arc::new(RwLock::new(plan));

            let requested = minutes.map(|m| Duration::from_secs(m * 60));
            let interval = AutoRefreshScheduler::interval_for(&state.config(), requested);
            let scheduler = AutoRefreshScheduler::new(state.clone(), plan.clone(), region, interval);
            let stop = scheduler.cancel_token();
            let handle = scheduler.start();

            println!("Refreshing every {} minute(s), Ctrl-C to stop", interval.as_secs() / 60);
            cancel.cancelled().await;
            stop.cancel();
            handle.await?;
            state.db()?.save_plan(&*plan.read().await)?;
        }

        Commands::List => {
            let plans = state.db()?.list_plans()?;
            if plans.is_empty() {
                println!("No saved plans. Run 'plan' first.");
            }
            for p in plans {
                println!(
                    "{}  {:<30} {:<10} {} item(s)  {}",
                    p.id,
                    p.name,
                    p.data_center,
                    p.root_count,
                    p.modified_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Delete { plan_id } => {
            if !state.db()?.delete_plan(&plan_id)? {
                bail!("No plan with id {}", plan_id);
            }
            println!("Deleted {}", plan_id);
        }

        Commands::CacheStats => {
            let stats = state.market_cache.stats(state.config().cache_ttl)?;
            println!(
                "{} entries ({} bytes): {} fresh, {} stale",
                stats.entries, stats.bytes, stats.fresh, stats.stale
            );
        }

        Commands::ClearCache => {
            state.market_cache.clear()?;
            println!("Market cache cleared");
        }
    }

    Ok(())
}

fn parse_target(raw: &str, hq: bool) -> Result<BuildTarget> {
    let (id, qty) = raw.split_once(':').unwrap_or((raw, "1"));
    let item_id: u32 = id.parse().with_context(|| format!("Invalid item id in '{}'", raw))?;
    let quantity: u32 = qty.parse().with_context(|| format!("Invalid quantity in '{}'", raw))?;
    Ok(BuildTarget {
        hq_required: hq,
        ..BuildTarget::new(item_id, format!("Item {}", item_id), quantity)
    })
}

fn load(state: &AppState, plan_id: &str) -> Result<CraftingPlan> {
    state
        .db()?
        .load_plan(plan_id)?
        .ok_or_else(|| anyhow!("No plan with id {}", plan_id))
}

fn print_plan(plan: &CraftingPlan) {
    println!("{} ({})", plan.name, plan.data_center);
    for root in &plan.root_items {
        print_node(root, 1);
    }
    println!("\nMaterials:");
    for m in plan.aggregated_materials() {
        println!(
            "  {:<32} x{:<5} {:>10.0} gil  {:?}",
            m.name, m.total_quantity, m.total_cost, m.source
        );
    }
    println!("Total: {:.0} gil", plan.total_cost());
}

fn print_node(node: &PlanNode, depth: usize) {
    println!(
        "{}{} x{} [{:?}] {:.0} gil",
        "  ".repeat(depth),
        node.display_name(),
        node.quantity,
        node.source,
        node.unit_cost()
    );
    if node.consumes_children() {
        for child in &node.children {
            print_node(child, depth + 1);
        }
    }
}
