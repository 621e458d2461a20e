//! Example: Masking an LLM Conversation
//!
//! Masks a prompt before it leaves the gateway, then restores the
//! identifiers in the model's reply.

use cloudmask_masking::MaskingEngine;

fn main() -> cloudmask_core::Result<()> {
    let engine = MaskingEngine::new()?;

    let prompt = "Why can't i-1234567890abcdef0 in vpc-12345678 reach \
                  arn:aws:s3:::billing-exports? It egresses via 54.239.28.85.";

    let report = engine.mask_with_report(prompt)?;
    println!("Prompt sent upstream:\n  {}\n", report.masked);
    for (category, count) in &report.patterns_applied {
        println!("  {:<20} {}", category, count);
    }

    // A model reply that only ever saw tokens.
    let reply = "Check the security group on AWS_EC2_001; AWS_VPC_001 has no \
                 route to AWS_ARN_001 and AWS_PUBLIC_IP_001 is not allow-listed.";
    let restored = engine.unmask_with_report(reply);
    println!("\nReply returned to the user:\n  {}", restored.unmasked);
    println!("  restored {} tokens", restored.patterns_restored);

    let leaks = engine.scan_for_leaks(&report.masked);
    println!("\nIdentifiers left in the masked prompt: {}", leaks.len());

    Ok(())
}
