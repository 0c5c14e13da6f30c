use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tmpo::commands::{Arguments, Commands, MilestoneCommand, ProjectsCommand};

mod commands;

fn main() -> Result<()> {
    dotenv().ok();
    let args = Arguments::parse();

    stderrlog::new()
        .quiet(args.quiet)
        .verbosity(args.verbose as usize + 2)
        .init()?;

    let ctx = match args.command {
        Commands::Config(config) => return commands::config(config),
        _ => commands::Context::load()?,
    };
    match args.command {
        Commands::Start(start) => commands::start(&ctx, start)?,
        Commands::Stop => commands::stop(&ctx)?,
        Commands::Pause => commands::pause(&ctx)?,
        Commands::Resume(project) => commands::resume(&ctx, project)?,
        Commands::Status => commands::status(&ctx)?,
        Commands::Log(log) => commands::log(&ctx, log)?,
        Commands::Manual(manual) => commands::manual(&ctx, manual)?,
        Commands::Edit(edit) => commands::edit(&ctx, edit)?,
        Commands::Delete(delete) => commands::delete(&ctx, delete)?,
        Commands::Stats(stats) => commands::stats(&ctx, stats)?,
        Commands::Export(export) => commands::export(&ctx, export)?,
        Commands::Milestone(milestone) => match milestone {
            MilestoneCommand::Start(start) => commands::milestone_start(&ctx, start)?,
            MilestoneCommand::Finish(project) => commands::milestone_finish(&ctx, project)?,
            MilestoneCommand::Status(project) => commands::milestone_status(&ctx, project)?,
            MilestoneCommand::List(list) => commands::milestone_list(&ctx, list)?,
        },
        Commands::Init(init) => commands::init(&ctx, init)?,
        Commands::Config(_) => {}
        Commands::Projects(projects) => match projects {
            ProjectsCommand::List => commands::projects_list(&ctx)?,
            ProjectsCommand::Remove { name } => commands::projects_remove(&ctx, &name)?,
        },
    }
    Ok(())
}
