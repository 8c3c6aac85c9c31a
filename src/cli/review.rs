//! Review CLI subcommands for listing and resolving human review tickets.

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::core::HumanReviewGateway;
use crate::domain::{ReviewDecision, ReviewTicket, TicketStatus};

#[derive(Subcommand, Debug)]
pub enum ReviewCommands {
    /// List review tickets
    List {
        /// Filter by status (pending, approved, rejected)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one ticket in full
    Show { ticket_id: String },

    /// Approve a pending ticket
    Approve {
        ticket_id: String,

        #[arg(long, env = "CCMS_REVIEWER")]
        reviewer: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Reject a pending ticket
    Reject {
        ticket_id: String,

        #[arg(long, env = "CCMS_REVIEWER")]
        reviewer: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },
}

pub async fn execute(command: ReviewCommands) -> Result<()> {
    let gateway = HumanReviewGateway::new(crate::config::review_log_path()?);

    match command {
        ReviewCommands::List { status } => {
            let status = status
                .as_deref()
                .map(str::parse::<TicketStatus>)
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            list_tickets(&gateway, status).await
        }
        ReviewCommands::Show { ticket_id } => {
            let ticket = gateway
                .get(&ticket_id)
                .await?
                .with_context(|| format!("Review ticket {} not found", ticket_id))?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
            Ok(())
        }
        ReviewCommands::Approve {
            ticket_id,
            reviewer,
            note,
        } => resolve(&gateway, &ticket_id, ReviewDecision::Approve, reviewer, note).await,
        ReviewCommands::Reject {
            ticket_id,
            reviewer,
            note,
        } => resolve(&gateway, &ticket_id, ReviewDecision::Reject, reviewer, note).await,
    }
}

async fn list_tickets(gateway: &HumanReviewGateway, status: Option<TicketStatus>) -> Result<()> {
    let tickets = gateway.list(status).await?;

    if tickets.is_empty() {
        println!("No review tickets");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<16} {:<8} {:<10} {:>6} {:>8}",
        "TICKET", "TENANT", "ITEM", "LOCALE", "STATUS", "SCORE", "BLOCKING"
    );
    println!("{}", "-".repeat(104));
    for ticket in &tickets {
        println!(
            "{:<38} {:<12} {:<16} {:<8} {:<10} {:>6.2} {:>8}",
            ticket.id,
            ticket.tenant_id,
            ticket.item_id,
            ticket.locale,
            ticket.status.as_str(),
            ticket.overall_score,
            ticket.blocking_issues.len()
        );
    }

    Ok(())
}

async fn resolve(
    gateway: &HumanReviewGateway,
    ticket_id: &str,
    decision: ReviewDecision,
    reviewer: Option<String>,
    note: Option<String>,
) -> Result<()> {
    let ticket: ReviewTicket = gateway
        .resolve(ticket_id, decision, reviewer.as_deref(), note.as_deref())
        .await?;

    println!("Ticket {} {}", ticket.id, ticket.status.as_str());
    eprintln!("Continue the run with: ccms resume {}", ticket.run_id);
    Ok(())
}
