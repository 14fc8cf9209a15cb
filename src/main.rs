use std::{process, sync::Arc};

use blockcache::{
    admin::{Actor, CacheAdmin, Capability},
    cache::{
        AuthenticatedViewerPolicy, BlockCache, BlockCacheConfig, BlockOptions, GenerationStamps,
        MemoryStore, PolicyRegistry, QueryContextKeyBuilder, ViewerIdentityKeyBuilder,
    },
    config::{self, Command, RenderArgs, Settings},
    context::{RequestContext, Viewer},
    infra::{error::InfraError, options::FileConfigStore, telemetry},
};
use bytes::Bytes;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command.unwrap_or(Command::Stamp) {
        Command::Stamp => run_stamp(&settings).await,
        Command::Flush(args) => run_flush(&settings, &args.actor).await,
        Command::Render(args) => run_render(&settings, args).await,
    }
}

async fn load_stamps(settings: &Settings) -> Result<Arc<GenerationStamps>, InfraError> {
    let options = FileConfigStore::new(settings.cache.state_file.clone());
    let stamps = GenerationStamps::load(Arc::new(options)).await?;
    Ok(Arc::new(stamps))
}

async fn run_stamp(settings: &Settings) -> Result<(), InfraError> {
    let stamps = load_stamps(settings).await?;
    println!("{}", stamps.current());
    Ok(())
}

async fn run_flush(settings: &Settings, actor: &str) -> Result<(), InfraError> {
    let stamps = load_stamps(settings).await?;
    let admin = CacheAdmin::new(stamps);
    let actor = Actor::new(actor, [Capability::ManageCache]);

    let stamp = admin.clear_cache(&actor).await?;
    info!(actor = %actor.name, stamp = %stamp, "cache flushed");
    println!("{stamp}");
    Ok(())
}

async fn run_render(settings: &Settings, args: RenderArgs) -> Result<(), InfraError> {
    let stamps = load_stamps(settings).await?;
    let config = BlockCacheConfig::from(&settings.cache);
    let store = Arc::new(MemoryStore::new(&config));

    let mut policies = PolicyRegistry::new();
    policies.register("account-menu", Arc::new(AuthenticatedViewerPolicy));
    let cache = BlockCache::new(config, store, stamps, policies);

    let viewer = match args.account {
        Some(account_id) => Viewer::Authenticated { account_id },
        None => Viewer::Anonymous,
    };
    let mut ctx = RequestContext::new(viewer);
    for (name, value) in args.query {
        ctx = ctx.with_query_var(name, value);
    }

    for pass in 1..=2 {
        let page = render_page(&cache, ctx.clone(), pass).await;
        println!("--- pass {pass} ---");
        print!("{}", String::from_utf8_lossy(&page));
    }
    Ok(())
}

/// Sample page: a sidebar varying by `?page` with a nested list, and a
/// per-viewer menu that is never cached for signed-in viewers.
async fn render_page(cache: &BlockCache, ctx: RequestContext, pass: u32) -> Bytes {
    let mut engine = cache.engine(ctx);
    engine.emit("<main>\n");

    let sidebar = BlockOptions::new().key_builder(Arc::new(QueryContextKeyBuilder::new(["page"])));
    if engine.begin("sidebar", sidebar).await {
        engine.emit(format!("<aside data-pass=\"{pass}\">\n"));
        if engine
            .begin("recent", BlockOptions::new().ttl_seconds(60))
            .await
        {
            engine.emit(format!("<ul><li>recent entries, pass {pass}</li></ul>\n"));
        }
        engine.end().await;
        engine.emit("</aside>\n");
    }
    engine.end().await;

    let menu = BlockOptions::new().key_builder(Arc::new(ViewerIdentityKeyBuilder));
    if engine.begin("account-menu", menu).await {
        let who = engine
            .context()
            .viewer()
            .account_id()
            .map_or_else(|| "guest".to_string(), |id| format!("account {id}"));
        engine.emit(format!("<nav>{who}, pass {pass}</nav>\n"));
    }
    engine.end().await;

    engine.emit("</main>\n");
    engine.into_output()
}
